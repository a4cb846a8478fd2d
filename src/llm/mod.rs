pub mod client;
pub mod structured;
pub mod throttle;

pub use client::{ChatClient, ChatClientConfig, ChatCompletionRequest, LlmClient, LlmError};
pub use structured::parse_json_array;
pub use throttle::{RetryPolicy, Throttle};
