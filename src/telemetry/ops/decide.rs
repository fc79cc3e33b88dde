use tracing::info_span;
use tracing::Span;

use crate::telemetry::ctx::{OpMarker, PhaseSpan};

#[derive(Copy, Clone, Debug)]
pub struct Decide;

#[derive(Copy, Clone, Debug)]
pub enum Phase { Embed, SearchDomain, SearchGlobal, Upsert }

impl PhaseSpan for Phase {
    fn name(&self) -> &'static str { match self { Phase::Embed => "embed", Phase::SearchDomain => "search_domain", Phase::SearchGlobal => "search_global", Phase::Upsert => "upsert" } }
    fn span(&self) -> Span { match self { Phase::Embed => info_span!("embed"), Phase::SearchDomain => info_span!("search_domain"), Phase::SearchGlobal => info_span!("search_global"), Phase::Upsert => info_span!("upsert") } }
}

impl OpMarker for Decide {
    const NAME: &'static str = "decide";
    type Phase = Phase;
    fn root_span() -> Span { info_span!("decide") }
}
