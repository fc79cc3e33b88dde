//! Decision verb: embed a URL and run it through the dedup engine, either
//! one-off or by draining queued rows.

use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::Instrument;

use crate::config::Settings;
use crate::dedup::{DedupDecision, DedupEngine, Floors};
use crate::dlq::DeadLetterQueue;
use crate::domain::{canonical_domain, canonical_url};
use crate::embed::{embed_text, Embedder, OllamaEmbedder};
use crate::error::CallResult;
use crate::queue::{IngestQueue, QueueRow, POP_DEFAULT_LIMIT};
use crate::resilience::{Resilient, ResilienceConfig};
use crate::store::{PointPayload, QdrantHttp};
use crate::telemetry::ops::decide::Phase as DecidePhase;
use crate::telemetry::{self};
use crate::warehouse::WarehouseSink;

pub const OP_EMBED: &str = "embed";

/// phishfeed decide url/drain
#[derive(Args)]
pub struct DecideCmd {
    #[command(subcommand)]
    pub cmd: DecideSub,
}

#[derive(Subcommand)]
pub enum DecideSub {
    // decide a single URL
    Url {
        url: String,
        /// Page title to include in the embedded text.
        #[arg(long)]
        title: Option<String>,
    },
    // pop queued rows and decide each one
    Drain {
        #[arg(long, default_value_t = POP_DEFAULT_LIMIT)]
        limit: usize,
    },
}

#[derive(Serialize)]
struct DrainResult {
    processed: usize,
    duplicates: usize,
    new: usize,
    failures: usize,
}

/// Embedder + engine wired up once per command, each external dependency
/// behind its own resilience state.
pub struct DecideWorker {
    engine: DedupEngine,
    embedder: OllamaEmbedder,
    embed_resilient: Resilient,
}

impl DecideWorker {
    pub fn new(settings: &Settings, dlq: DeadLetterQueue) -> Result<Self> {
        let store = Arc::new(QdrantHttp::new(
            &settings.qdrant_url,
            &settings.qdrant_collection,
            settings.qdrant_timeout,
        )?);
        let engine = DedupEngine::new(
            store,
            Resilient::new(
                ResilienceConfig::from_settings(
                    settings,
                    settings.qdrant_rps,
                    settings.qdrant_timeout,
                ),
                dlq.clone(),
            ),
            Floors {
                same_domain: settings.dedup_same_domain_min_sim,
                global: settings.dedup_global_min_sim,
            },
            settings.dedup_top_k,
            None,
        );
        let embedder = OllamaEmbedder::new(
            &settings.ollama_base_url,
            &settings.embed_model_name,
            settings.ollama_timeout,
        )?;
        let embed_resilient = Resilient::new(
            ResilienceConfig::from_settings(settings, settings.ollama_rps, settings.ollama_timeout),
            dlq,
        );
        Ok(Self {
            engine,
            embedder,
            embed_resilient,
        })
    }

    pub async fn decide_row(&self, row: &QueueRow) -> CallResult<DedupDecision> {
        let log = telemetry::decide();
        let url = canonical_url(&row.url);
        let domain = canonical_domain(&url);
        let title = if row.title.is_empty() {
            domain.clone()
        } else {
            row.title.clone()
        };
        let text = embed_text(&url, &title, &domain);

        let embedding = self
            .embed_resilient
            .call(OP_EMBED, json!({ "url": &url }), || async {
                self.embedder.embed(&text).await
            })
            .instrument(log.span(&DecidePhase::Embed))
            .await?;

        let payload = PointPayload {
            url: url.clone(),
            domain,
            title: Some(title),
            source: Some(row.source.clone()),
            enqueued_at: Some(row.enqueued_at),
            ..Default::default()
        };
        self.engine
            .decide_and_record(&url, &embedding.vector, payload)
            .await
    }
}

pub async fn run(settings: &Settings, args: DecideCmd) -> Result<()> {
    let log = telemetry::decide();
    let _g = log.root_span().entered();
    let dlq = DeadLetterQueue::new(&settings.buffer_dir);
    let worker = DecideWorker::new(settings, dlq.clone())?;
    match args.cmd {
        DecideSub::Url { url, title } => {
            let canon = canonical_url(&url);
            let domain = canonical_domain(&canon);
            let row = QueueRow::new(
                canon,
                domain.clone(),
                title.unwrap_or(domain),
                "manual".to_string(),
            );
            let decision = worker.decide_row(&row).await?;
            log.decision(&row.url, decision.is_duplicate, decision.similarity);
            if telemetry::config::json_mode() {
                log.result(&decision)?;
            }
        }
        DecideSub::Drain { limit } => {
            let queue = IngestQueue::new(&settings.buffer_dir)?;
            let rows = queue.pop(limit).await?;
            let mut result = DrainResult {
                processed: 0,
                duplicates: 0,
                new: 0,
                failures: 0,
            };
            let mut events = Vec::new();
            let mut receipts = Vec::new();
            for row in &rows {
                match worker.decide_row(row).await {
                    Ok(decision) => {
                        result.processed += 1;
                        if decision.is_duplicate {
                            result.duplicates += 1;
                        } else {
                            result.new += 1;
                            receipts.push(json!({
                                "url": row.url,
                                "domain": row.domain,
                                "source": row.source,
                                "enqueued_at": row.enqueued_at,
                            }));
                        }
                        log.decision(&row.url, decision.is_duplicate, decision.similarity);
                        events.push(json!({
                            "url": row.url,
                            "domain": row.domain,
                            "source": row.source,
                            "is_duplicate": decision.is_duplicate,
                            "similarity": decision.similarity,
                            "matched_point_id": decision.matched_point_id,
                        }));
                    }
                    // terminal failures are already dead-lettered; keep draining
                    Err(e) => {
                        result.failures += 1;
                        log.warn(format!("decision failed for {}: {}", row.url, e));
                    }
                }
            }
            flush_warehouse(settings, dlq, &events, &receipts).await;
            log.info(format!(
                "📊 Drain — processed={} duplicates={} new={} failures={}",
                result.processed, result.duplicates, result.new, result.failures
            ));
            if telemetry::config::json_mode() {
                log.result(&result)?;
            }
        }
    }
    Ok(())
}

/// Best-effort analytics writes after a drain. No warehouse backend is
/// wired up by default, so `Disabled` is the quiet common case; real
/// failures are already dead-lettered row-by-row by the sink.
async fn flush_warehouse(
    settings: &Settings,
    dlq: DeadLetterQueue,
    events: &[serde_json::Value],
    receipts: &[serde_json::Value],
) {
    let log = telemetry::decide();
    let sink = WarehouseSink::new(
        None,
        Resilient::new(
            ResilienceConfig::from_settings(settings, settings.qdrant_rps, settings.qdrant_timeout),
            dlq,
        ),
    );
    for (label, rows, outcome) in [
        ("events", events, sink.write_events(events).await),
        ("receipts", receipts, sink.write_receipts(receipts).await),
    ] {
        match outcome {
            Ok(()) => {}
            Err(crate::error::CallError::Disabled { .. }) => {
                log.debug(format!("warehouse disabled, dropping {} {}", rows.len(), label));
            }
            Err(e) => log.warn(format!("warehouse {} write failed: {}", label, e)),
        }
    }
}
