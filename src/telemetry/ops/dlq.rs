use tracing::info_span;
use tracing::Span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Dlq;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Scan, Replay }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self { Phase::Scan => "scan", Phase::Replay => "replay" } }
    fn span(&self) -> Span { match self { Phase::Scan => info_span!("scan"), Phase::Replay => info_span!("replay") } }
}

impl OpMarker for Dlq {
    const NAME: &'static str = "dlq";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("dlq") }
}
