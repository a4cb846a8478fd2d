use std::path::Path;

use crate::error::PipelineError;

pub const DEFAULT_PAPER_DELIMITER: &str = "[END_OF_PAPER]";

/// Read a UTF-8 text artifact, mapping failures onto the run-level errors.
pub fn load_text(path: &Path) -> Result<String, PipelineError> {
    if !path.exists() {
        return Err(PipelineError::SourceNotFound(path.to_path_buf()));
    }
    std::fs::read_to_string(path)
        .map_err(|source| PipelineError::SourceUnreadable { path: path.to_path_buf(), source })
}

/// Split a concatenated corpus on `delimiter`; papers are trimmed and empty
/// ones dropped. A corpus without delimiters is a single paper.
pub fn split_papers<'a>(text: &'a str, delimiter: &str) -> Vec<&'a str> {
    let pieces: Box<dyn Iterator<Item = &'a str>> = if delimiter.is_empty() {
        Box::new(std::iter::once(text))
    } else {
        Box::new(text.split(delimiter))
    };
    pieces.map(str::trim).filter(|p| !p.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_and_strips_delimiters() {
        let corpus = "first paper\n[END_OF_PAPER]\n\n[END_OF_PAPER] second paper [END_OF_PAPER]\n";
        assert_eq!(split_papers(corpus, DEFAULT_PAPER_DELIMITER), vec!["first paper", "second paper"]);
        assert_eq!(split_papers("just text", DEFAULT_PAPER_DELIMITER), vec!["just text"]);
        assert!(split_papers("  \n", DEFAULT_PAPER_DELIMITER).is_empty());
    }

    #[test]
    fn missing_file_is_source_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_text(&dir.path().join("nope.txt")).unwrap_err();
        assert!(matches!(err, PipelineError::SourceNotFound(_)));
    }

    #[test]
    fn directory_is_source_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_text(dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::SourceUnreadable { .. }));
    }

    #[test]
    fn reads_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.txt");
        std::fs::write(&path, "Bacia de Campos").unwrap();
        assert_eq!(load_text(&path).unwrap(), "Bacia de Campos");
    }
}
