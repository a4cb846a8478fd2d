use serde::de::DeserializeOwned;

use crate::error::PipelineError;

/// Parse a reply that must be a JSON array of `T`.
///
/// A single surrounding markdown code fence is tolerated; any other
/// deviation is a `MalformedStructuredResponse`.
pub fn parse_json_array<T: DeserializeOwned>(reply: &str) -> Result<Vec<T>, PipelineError> {
    let body = strip_code_fence(reply.trim());
    serde_json::from_str::<Vec<T>>(body).map_err(|e| {
        PipelineError::MalformedStructuredResponse(format!("{e} in reply: {}", preview(reply)))
    })
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else { return s };
    // drop an optional language tag on the opening fence line
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or("");
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn preview(s: &str) -> String {
    const MAX: usize = 120;
    let s = s.trim();
    match s.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}…", &s[..idx]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        term: String,
        category: String,
    }

    #[test]
    fn parses_plain_and_fenced_arrays() {
        let plain: Vec<String> = parse_json_array(r#"["Microbial Carbonate", "Diagenesis"]"#).unwrap();
        assert_eq!(plain, vec!["Microbial Carbonate", "Diagenesis"]);

        let fenced: Vec<Item> =
            parse_json_array("```json\n[{\"term\": \"arenito\", \"category\": \"Rock\"}]\n```").unwrap();
        assert_eq!(fenced, vec![Item { term: "arenito".into(), category: "Rock".into() }]);
    }

    #[test]
    fn objects_and_prose_are_malformed() {
        let err = parse_json_array::<String>(r#"{"terms": []}"#).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedStructuredResponse(_)));
        assert!(parse_json_array::<Item>("Sure! Here are the categories").is_err());
        assert!(parse_json_array::<Item>(r#"[{"term": "x"}]"#).is_err());
    }

    #[test]
    fn long_replies_are_truncated_in_errors() {
        let reply = "x".repeat(500);
        let PipelineError::MalformedStructuredResponse(msg) = parse_json_array::<String>(&reply).unwrap_err() else {
            panic!("expected malformed response");
        };
        assert!(msg.len() < 300);
    }
}
