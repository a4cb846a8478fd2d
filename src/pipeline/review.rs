use serde::Serialize;

use crate::io::{CsvFormat, CsvRecord};

/// A record the pipeline could not process and a human should look at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewRow {
    pub term: String,
    pub label: String,
    pub stage: &'static str,
    pub reason: String,
    /// Raw model answer when there was one.
    pub response: String,
}

impl ReviewRow {
    pub fn new(term: impl Into<String>, label: impl Into<String>, stage: &'static str, reason: impl Into<String>) -> Self {
        Self { term: term.into(), label: label.into(), stage, reason: reason.into(), response: String::new() }
    }

    pub fn with_response(mut self, response: impl Into<String>) -> Self {
        self.response = response.into();
        self
    }
}

impl CsvRecord for ReviewRow {
    const HEADER: &'static [&'static str] = &["term", "label", "stage", "reason", "response"];

    fn fields(&self, _fmt: &CsvFormat) -> Vec<String> {
        vec![self.term.clone(), self.label.clone(), self.stage.to_string(), self.reason.clone(), self.response.clone()]
    }
}
