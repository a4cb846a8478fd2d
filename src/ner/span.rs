use serde::Serialize;

/// Entity returned by the labeling capability, offsets local to the chunk text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawEntitySpan {
    pub text: String,
    pub label: String,
    pub score: f32,
    pub start: usize,
    pub end: usize,
}

/// Entity with offsets into the whole document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentEntitySpan {
    pub text: String,
    pub label: String,
    pub score: f32,
    pub start: usize,
    pub end: usize,
}

impl RawEntitySpan {
    /// Shift chunk-local offsets by the window's base offset.
    pub fn into_document(self, base_offset: usize) -> DocumentEntitySpan {
        DocumentEntitySpan {
            text: self.text,
            label: self.label,
            score: self.score,
            start: self.start + base_offset,
            end: self.end + base_offset,
        }
    }
}

impl DocumentEntitySpan {
    /// Identity used for overlap deduplication.
    pub fn key(&self) -> (usize, usize, &str) {
        (self.start, self.end, self.label.as_str())
    }
}
