use tracing::Span;
use tracing::info_span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct LlmExtract;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Plan, LoadCorpus, Extract, Write }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self {
        Phase::Plan => "plan",
        Phase::LoadCorpus => "load_corpus",
        Phase::Extract => "extract",
        Phase::Write => "write",
    }}
    fn span(&self) -> Span { match self {
        Phase::Plan => info_span!("plan"),
        Phase::LoadCorpus => info_span!("load_corpus"),
        Phase::Extract => info_span!("extract"),
        Phase::Write => info_span!("write"),
    }}
}

impl OpMarker for LlmExtract {
    const NAME: &'static str = "llm_extract";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("llm_extract") }
}
