use tracing::info_span;
use tracing::Span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Poll;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Fetch, Merge, Suppress, Enqueue }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self { Phase::Fetch => "fetch", Phase::Merge => "merge", Phase::Suppress => "suppress", Phase::Enqueue => "enqueue" } }
    fn span(&self) -> Span { match self { Phase::Fetch => info_span!("fetch"), Phase::Merge => info_span!("merge"), Phase::Suppress => info_span!("suppress"), Phase::Enqueue => info_span!("enqueue") } }
}

impl OpMarker for Poll {
    const NAME: &'static str = "poll";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("poll") }
}
