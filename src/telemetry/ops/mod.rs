pub mod ner;
pub mod llm_extract;
pub mod consolidate;
pub mod define;
pub mod categorize;
