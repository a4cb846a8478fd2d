pub mod config;
pub mod ctx;
pub mod emit;
pub mod ops;

use std::marker::PhantomData;

use ctx::LogCtx;

// One typed log context per pipeline stage
pub fn ner() -> LogCtx<ops::ner::Ner> { LogCtx { json: config::logs_are_json(), _marker: PhantomData } }
pub fn llm_extract() -> LogCtx<ops::llm_extract::LlmExtract> { LogCtx { json: config::logs_are_json(), _marker: PhantomData } }
pub fn consolidate() -> LogCtx<ops::consolidate::Consolidate> { LogCtx { json: config::logs_are_json(), _marker: PhantomData } }
pub fn define() -> LogCtx<ops::define::Define> { LogCtx { json: config::logs_are_json(), _marker: PhantomData } }
pub fn categorize() -> LogCtx<ops::categorize::Categorize> { LogCtx { json: config::logs_are_json(), _marker: PhantomData } }
