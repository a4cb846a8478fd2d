use tracing::Span;
use tracing::info_span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Define;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Plan, Load, Correct, Define, Write }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self {
        Phase::Plan => "plan",
        Phase::Load => "load",
        Phase::Correct => "correct",
        Phase::Define => "define",
        Phase::Write => "write",
    }}
    fn span(&self) -> Span { match self {
        Phase::Plan => info_span!("plan"),
        Phase::Load => info_span!("load"),
        Phase::Correct => info_span!("correct"),
        Phase::Define => info_span!("define"),
        Phase::Write => info_span!("write"),
    }}
}

impl OpMarker for Define {
    const NAME: &'static str = "define";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("define") }
}
