use tracing::Span;
use tracing::info_span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Categorize;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Plan, Load, Classify, Write }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self {
        Phase::Plan => "plan",
        Phase::Load => "load",
        Phase::Classify => "classify",
        Phase::Write => "write",
    }}
    fn span(&self) -> Span { match self {
        Phase::Plan => info_span!("plan"),
        Phase::Load => info_span!("load"),
        Phase::Classify => info_span!("classify"),
        Phase::Write => info_span!("write"),
    }}
}

impl OpMarker for Categorize {
    const NAME: &'static str = "categorize";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("categorize") }
}
