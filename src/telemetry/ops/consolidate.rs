use tracing::Span;
use tracing::info_span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Consolidate;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Load, Stem, Write }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self {
        Phase::Load => "load",
        Phase::Stem => "stem",
        Phase::Write => "write",
    }}
    fn span(&self) -> Span { match self {
        Phase::Load => info_span!("load"),
        Phase::Stem => info_span!("stem"),
        Phase::Write => info_span!("write"),
    }}
}

impl OpMarker for Consolidate {
    const NAME: &'static str = "consolidate";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("consolidate") }
}
