use tracing::info_span;
use tracing::Span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Init;

#[derive(Copy, Clone, Debug)]
pub enum Phase { ProbeDim, EnsureCollection, EnsureIndexes }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self { Phase::ProbeDim => "probe_dim", Phase::EnsureCollection => "ensure_collection", Phase::EnsureIndexes => "ensure_indexes" } }
    fn span(&self) -> Span { match self { Phase::ProbeDim => info_span!("probe_dim"), Phase::EnsureCollection => info_span!("ensure_collection"), Phase::EnsureIndexes => info_span!("ensure_indexes") } }
}

impl OpMarker for Init {
    const NAME: &'static str = "init";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("init") }
}
