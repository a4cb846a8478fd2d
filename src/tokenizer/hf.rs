use std::path::Path;

use anyhow::{anyhow, Result};
use tokenizers::Tokenizer;

use super::{TokenStream, TokenizerAdapter};

/// Hugging Face tokenizer used for whole-document tokenization.
///
/// Truncation is disabled so the stream covers the full document; windowing
/// is the caller's job.
#[derive(Debug, Clone)]
pub struct HfTokenizer {
    inner: Tokenizer,
}

impl HfTokenizer {
    // loads tokenizer.json for `model_id` from the HF Hub
    pub fn from_pretrained(model_id: &str) -> Result<Self> {
        let tok = Tokenizer::from_pretrained(model_id, None).map_err(|e| anyhow!("{}", e))?;
        Self::untruncated(tok)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let tok = Tokenizer::from_file(path).map_err(|e| anyhow!("{}", e))?;
        Self::untruncated(tok)
    }

    fn untruncated(mut tok: Tokenizer) -> Result<Self> {
        tok.with_truncation(None).map_err(|e| anyhow!("{}", e))?;
        tok.with_padding(None);
        Ok(Self { inner: tok })
    }
}

impl TokenizerAdapter for HfTokenizer {
    fn tokenize(&self, text: &str) -> Result<TokenStream> {
        let enc = self.inner.encode(text, true).map_err(|e| anyhow!("{}", e))?;
        let special = enc.get_special_tokens_mask();
        let spans = enc
            .get_offsets()
            .iter()
            .enumerate()
            .map(|(i, &(start, end))| {
                // special tokens come back with (0, 0) offsets; mask is authoritative
                if special.get(i).copied().unwrap_or(0) == 1 { None } else { Some((start, end)) }
            })
            .collect();
        TokenStream::new(enc.get_ids().to_vec(), spans)
    }

    fn detokenize(&self, ids: &[u32]) -> Result<String> {
        self.inner.decode(ids, true).map_err(|e| anyhow!("{}", e))
    }
}
