pub mod hf;

use anyhow::{bail, Result};

pub use hf::HfTokenizer;

/// Half-open byte interval `[start, end)` into the source text.
pub type CharSpan = (usize, usize);

/// Token ids of one document with a parallel array of offsets.
///
/// `spans[i]` is `None` only for structural/special tokens.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStream {
    ids: Vec<u32>,
    spans: Vec<Option<CharSpan>>,
}

impl TokenStream {
    pub fn new(ids: Vec<u32>, spans: Vec<Option<CharSpan>>) -> Result<Self> {
        if ids.len() != spans.len() {
            bail!("token stream mismatch: {} ids vs {} spans", ids.len(), spans.len());
        }
        Ok(Self { ids, spans })
    }

    pub fn len(&self) -> usize { self.ids.len() }

    pub fn is_empty(&self) -> bool { self.ids.is_empty() }

    pub fn ids(&self) -> &[u32] { &self.ids }

    pub fn spans(&self) -> &[Option<CharSpan>] { &self.spans }

    /// Start offset of the first real token at or after `index`.
    pub fn first_real_offset_from(&self, index: usize) -> Option<usize> {
        self.spans
            .iter()
            .skip(index)
            .find_map(|span| span.map(|(start, _)| start))
    }
}

/// Text <-> token capability used by the window extractor.
pub trait TokenizerAdapter {
    fn tokenize(&self, text: &str) -> Result<TokenStream>;
    /// Decode ids back to text with special tokens stripped.
    fn detokenize(&self, ids: &[u32]) -> Result<String>;
}
