use tracing::Span;
use tracing::info_span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Ner;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Plan, LoadModel, Tokenize, Label, Dedup, Aggregate, Write }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self {
        Phase::Plan => "plan",
        Phase::LoadModel => "load_model",
        Phase::Tokenize => "tokenize",
        Phase::Label => "label",
        Phase::Dedup => "dedup",
        Phase::Aggregate => "aggregate",
        Phase::Write => "write",
    }}
    fn span(&self) -> Span { match self {
        Phase::Plan => info_span!("plan"),
        Phase::LoadModel => info_span!("load_model"),
        Phase::Tokenize => info_span!("tokenize"),
        Phase::Label => info_span!("label"),
        Phase::Dedup => info_span!("dedup"),
        Phase::Aggregate => info_span!("aggregate"),
        Phase::Write => info_span!("write"),
    }}
}

impl OpMarker for Ner {
    const NAME: &'static str = "ner";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("ner") }
}
