pub mod onnx;

use anyhow::Result;

use crate::ner::span::RawEntitySpan;

pub use onnx::OnnxTokenClassifier;

/// Sequence-labeling capability: text in, labeled spans out.
///
/// Offsets of the returned spans are byte offsets into `text`.
pub trait EntityLabeler {
    fn label(&mut self, text: &str) -> Result<Vec<RawEntitySpan>>;

    /// Longest window, in tokens, labeled without truncation.
    fn max_window_tokens(&self) -> Option<usize> { None }
}

#[cfg(test)]
pub mod testing {
    use std::collections::HashSet;

    use anyhow::bail;

    use super::*;

    /// Deterministic labeler that tags every occurrence of known keywords.
    #[derive(Debug, Default)]
    pub struct KeywordLabeler {
        keywords: Vec<(String, String, f32)>,
        fail_on: HashSet<usize>,
        max_tokens: Option<usize>,
        pub calls: Vec<String>,
    }

    impl KeywordLabeler {
        pub fn new<'a>(keywords: impl IntoIterator<Item = (&'a str, &'a str, f32)>) -> Self {
            Self {
                keywords: keywords
                    .into_iter()
                    .map(|(k, l, s)| (k.to_string(), l.to_string(), s))
                    .collect(),
                ..Self::default()
            }
        }

        /// Make the n-th call (0-based) fail.
        pub fn failing_on(mut self, call: usize) -> Self {
            self.fail_on.insert(call);
            self
        }

        pub fn with_max_tokens(mut self, max: usize) -> Self {
            self.max_tokens = Some(max);
            self
        }
    }

    impl EntityLabeler for KeywordLabeler {
        fn label(&mut self, text: &str) -> Result<Vec<RawEntitySpan>> {
            let call = self.calls.len();
            self.calls.push(text.to_string());
            if self.fail_on.contains(&call) {
                bail!("model crashed on call {}", call);
            }
            let mut out = Vec::new();
            for (kw, label, score) in &self.keywords {
                for (start, m) in text.match_indices(kw.as_str()) {
                    out.push(RawEntitySpan {
                        text: m.to_string(),
                        label: label.clone(),
                        score: *score,
                        start,
                        end: start + m.len(),
                    });
                }
            }
            out.sort_by_key(|s| s.start);
            Ok(out)
        }

        fn max_window_tokens(&self) -> Option<usize> { self.max_tokens }
    }
}
