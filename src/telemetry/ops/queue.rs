use tracing::info_span;
use tracing::Span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Queue;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Push, Pop }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self { Phase::Push => "push", Phase::Pop => "pop" } }
    fn span(&self) -> Span { match self { Phase::Push => info_span!("push"), Phase::Pop => info_span!("pop") } }
}

impl OpMarker for Queue {
    const NAME: &'static str = "queue";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("queue") }
}
