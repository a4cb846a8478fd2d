use std::env;

use crate::telemetry::config::json_mode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub pretty: bool,
}

impl OutputConfig {
    // --json wins over PETROTERM_OUTPUT_FORMAT
    pub fn from_env() -> Self {
        let format = if json_mode() {
            OutputFormat::Json
        } else {
            match env::var("PETROTERM_OUTPUT_FORMAT").ok().as_deref() {
                Some("json") => OutputFormat::Json,
                _ => OutputFormat::Text,
            }
        };
        let pretty = matches!(
            env::var("PETROTERM_OUTPUT_PRETTY").ok().as_deref(),
            Some(v) if v.eq_ignore_ascii_case("1") || v.eq_ignore_ascii_case("true") || v.eq_ignore_ascii_case("yes")
        );
        OutputConfig { format, pretty }
    }
}
