use std::sync::OnceLock;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

static JSON_MODE: OnceLock<bool> = OnceLock::new();

// onnxruntime and the hub client are chatty at info
const DEFAULT_FILTER: &str = "info,ort=warn,hf_hub=warn";

/// Set once from the global `--json` flag.
pub fn set_json_mode(v: bool) {
    let _ = JSON_MODE.set(v);
}

pub fn json_mode() -> bool {
    *JSON_MODE.get().unwrap_or(&false)
}

pub fn logs_are_json() -> bool {
    matches!(std::env::var("PETROTERM_LOG_FORMAT").as_deref(), Ok("json"))
}

/// Install the stderr subscriber. `RUST_LOG` overrides the default filter;
/// `PETROTERM_LOG_FORMAT=json` switches to flattened JSON lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let layer = fmt::layer().with_target(false).with_writer(std::io::stderr);
    let registry = tracing_subscriber::registry().with(filter);

    if logs_are_json() {
        let _ = registry.with(layer.json().flatten_event(true)).try_init();
    } else {
        let _ = registry.with(layer.compact()).try_init();
    }
}
