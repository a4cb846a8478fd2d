pub mod args;
pub mod categorize;
pub mod consolidate;
pub mod define;
pub mod llm_extract;
pub mod review;
