use std::path::PathBuf;

use thiserror::Error;

use crate::llm::LlmError;

/// Failure taxonomy shared by every pipeline stage.
///
/// Fatal variants (`InvalidConfiguration`, `SourceNotFound`, `SourceUnreadable`)
/// abort a run. The rest describe a single window, item or batch and are
/// routed to logs or to the review sink by the stage that observed them.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("source unreadable: {}: {source}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("labeling failed for window {window}: {message}")]
    LabelingCapabilityFailure { window: usize, message: String },

    #[error("response blocked: {0}")]
    ResponseBlocked(String),

    #[error("batch {batch}: expected {expected} result(s), got {got}")]
    BatchCardinalityMismatch { batch: usize, expected: usize, got: usize },

    #[error("malformed structured response: {0}")]
    MalformedStructuredResponse(String),

    #[error("term could not be normalized: {0}")]
    UnknownTerm(String),

    #[error("llm call failed: {0}")]
    Llm(#[source] LlmError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LlmError> for PipelineError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Blocked(reason) => PipelineError::ResponseBlocked(reason),
            LlmError::MissingApiKey => PipelineError::InvalidConfiguration(err.to_string()),
            other => PipelineError::Llm(other),
        }
    }
}

impl PipelineError {
    /// Whether this error ends the run rather than a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::InvalidConfiguration(_)
                | PipelineError::SourceNotFound(_)
                | PipelineError::SourceUnreadable { .. }
                | PipelineError::Io(_)
        )
    }

    /// Transient failures worth another attempt under a retry policy.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Llm(e) => e.is_retryable(),
            PipelineError::BatchCardinalityMismatch { .. } | PipelineError::MalformedStructuredResponse(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = PipelineError::BatchCardinalityMismatch { batch: 2, expected: 10, got: 9 };
        assert_eq!(format!("{err}"), "batch 2: expected 10 result(s), got 9");

        let err = PipelineError::SourceNotFound(PathBuf::from("corpus.txt"));
        assert_eq!(format!("{err}"), "source not found: corpus.txt");
    }

    #[test]
    fn llm_errors_map_onto_the_taxonomy() {
        assert!(matches!(PipelineError::from(LlmError::Blocked("safety".into())), PipelineError::ResponseBlocked(_)));
        let missing = PipelineError::from(LlmError::MissingApiKey);
        assert!(missing.is_fatal());
        let timeout = PipelineError::from(LlmError::Timeout);
        assert!(!timeout.is_fatal());
        assert!(timeout.is_retryable());
        assert!(!PipelineError::ResponseBlocked("x".into()).is_retryable());
    }

    #[test]
    fn only_run_level_errors_are_fatal() {
        assert!(PipelineError::InvalidConfiguration("overlap".into()).is_fatal());
        assert!(!PipelineError::ResponseBlocked("safety".into()).is_fatal());
        assert!(!PipelineError::UnknownTerm("xyz".into()).is_fatal());
        assert!(
            !PipelineError::LabelingCapabilityFailure { window: 0, message: "oom".into() }.is_fatal()
        );
    }
}
