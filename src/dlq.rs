use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{warn, Instrument};

use crate::config::Settings;
use crate::dedup::{DedupEngine, Floors, OP_UPSERT};
use crate::embed::{embed_text, Embedder, OllamaEmbedder};
use crate::resilience::{Resilient, ResilienceConfig};
use crate::store::{PointPayload, QdrantHttp};
use crate::telemetry::ops::dlq::Phase as DlqPhase;
use crate::telemetry::{self};

/// One dead-lettered side effect, with enough payload to retry later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub op: String,
    pub payload: serde_json::Value,
    pub reason: String,
    pub ts: DateTime<Utc>,
}

/// Append-only per-operation log of failed side effects. One JSONL stream
/// per operation name under `<buffer>/dlq/`. Entries are never mutated;
/// replay is an external, on-demand concern (`phishfeed dlq replay`).
#[derive(Clone)]
pub struct DeadLetterQueue {
    dir: PathBuf,
}

impl DeadLetterQueue {
    pub fn new(buffer_dir: &Path) -> Self {
        Self {
            dir: buffer_dir.join("dlq"),
        }
    }

    fn stream_path(&self, op: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", op))
    }

    pub fn append(&self, op: &str, payload: serde_json::Value, reason: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create dlq dir {}", self.dir.display()))?;
        let entry = DlqEntry {
            op: op.to_string(),
            payload,
            reason: reason.to_string(),
            ts: Utc::now(),
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        let path = self.stream_path(op);
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open dlq stream {}", path.display()))?;
        f.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Best-effort append for use inside failure paths: a DLQ write must
    /// never mask the original error.
    pub fn append_lossy(&self, op: &str, payload: serde_json::Value, reason: &str) {
        if let Err(e) = self.append(op, payload, reason) {
            warn!(op, error = %e, "failed to write dead-letter entry");
        }
    }

    /// Reads every parseable entry in one operation's stream, skipping
    /// trailing partial or corrupt lines. Empty when the stream is absent.
    pub fn scan(&self, op: &str) -> Result<Vec<DlqEntry>> {
        let path = self.stream_path(op);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("read dlq stream"),
        };
        let mut out = Vec::new();
        for line in content.lines() {
            match serde_json::from_str::<DlqEntry>(line) {
                Ok(entry) => out.push(entry),
                Err(e) => warn!(op, error = %e, "skipping corrupt dlq line"),
            }
        }
        Ok(out)
    }

    /// Drains one stream: returns its entries and removes the backing file.
    /// The caller re-appends whatever it could not replay.
    pub fn take(&self, op: &str) -> Result<Vec<DlqEntry>> {
        let entries = self.scan(op)?;
        match fs::remove_file(self.stream_path(op)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("remove dlq stream"),
        }
        Ok(entries)
    }
}

/// phishfeed dlq ls/replay
#[derive(Args)]
pub struct DlqCmd {
    #[command(subcommand)]
    pub cmd: DlqSub,
}

#[derive(Subcommand)]
pub enum DlqSub {
    // list dead-letter entries for one operation stream
    Ls {
        op: String,
    },
    // replay dead-lettered vector-store upserts
    Replay {
        /// Max entries to replay this run; the rest stay queued.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Serialize)]
struct LsResult {
    op: String,
    count: usize,
    entries: Vec<DlqEntry>,
}

#[derive(Serialize)]
struct ReplayResult {
    taken: usize,
    replayed: usize,
    duplicates: usize,
    skipped: usize,
    failed: usize,
}

pub async fn run(settings: &Settings, args: DlqCmd) -> Result<()> {
    let log = telemetry::dlq();
    let _g = log.root_span().entered();
    let dlq = DeadLetterQueue::new(&settings.buffer_dir);
    match args.cmd {
        DlqSub::Ls { op } => {
            let _s = log.span(&DlqPhase::Scan).entered();
            let entries = dlq.scan(&op)?;
            log.info(format!("💀 {} entr(ies) in '{}'", entries.len(), op));
            for e in &entries {
                log.info(format!("  [{}] {}", e.ts, e.reason));
            }
            if telemetry::config::json_mode() {
                let count = entries.len();
                log.result(&LsResult { op, count, entries })?;
            }
        }
        DlqSub::Replay { limit } => {
            let result = replay_upserts(settings, &dlq, limit).await?;
            log.info(format!(
                "🔁 Replay — taken={} replayed={} duplicates={} skipped={} failed={}",
                result.taken, result.replayed, result.duplicates, result.skipped, result.failed
            ));
            if telemetry::config::json_mode() {
                log.result(&result)?;
            }
        }
    }
    Ok(())
}

/// Drains the upsert stream and re-runs each entry through the decision
/// engine. Entries with a recorded vector are replayed as-is; the rest are
/// re-embedded from their payload text. Entries beyond `limit` or missing a
/// URL go straight back onto the stream.
async fn replay_upserts(
    settings: &Settings,
    dlq: &DeadLetterQueue,
    limit: Option<usize>,
) -> Result<ReplayResult> {
    let log = telemetry::dlq();
    let store = Arc::new(QdrantHttp::new(
        &settings.qdrant_url,
        &settings.qdrant_collection,
        settings.qdrant_timeout,
    )?);
    let resilient = Resilient::new(
        ResilienceConfig::from_settings(settings, settings.qdrant_rps, settings.qdrant_timeout),
        dlq.clone(),
    );
    let engine = DedupEngine::new(
        store,
        resilient,
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

    let entries = {
        let _s = log.span(&DlqPhase::Scan).entered();
        dlq.take(OP_UPSERT)?
    };
    let taken = entries.len();
    let limit = limit.unwrap_or(usize::MAX);

    let mut replayed = 0usize;
    let mut duplicates = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;
    async {
        for (i, entry) in entries.into_iter().enumerate() {
            if i >= limit {
                dlq.append_lossy(OP_UPSERT, entry.payload, &entry.reason);
                continue;
            }
            let Some(url) = entry.payload["url"].as_str().map(str::to_string) else {
                skipped += 1;
                dlq.append_lossy(OP_UPSERT, entry.payload, &entry.reason);
                continue;
            };
            let payload: PointPayload =
                serde_json::from_value(entry.payload["payload"].clone()).unwrap_or_default();

            let vector = match vector_from(&entry.payload) {
                Some(v) => v,
                None => {
                    let title = payload.title.clone().unwrap_or_else(|| payload.domain.clone());
                    match embedder
                        .embed(&embed_text(&url, &title, &payload.domain))
                        .await
                    {
                        Ok(e) => e.vector,
                        Err(e) => {
                            failed += 1;
                            log.warn(format!("embed failed for {}: {}", url, e));
                            dlq.append_lossy(OP_UPSERT, entry.payload, &entry.reason);
                            continue;
                        }
                    }
                }
            };

            // terminal failures are dead-lettered by the engine onto the (now
            // fresh) stream; anything else we put back ourselves
            match engine.decide_and_record(&url, &vector, payload).await {
                Ok(decision) => {
                    replayed += 1;
                    if decision.is_duplicate {
                        duplicates += 1;
                    }
                }
                Err(e) => {
                    failed += 1;
                    log.warn(format!("replay failed for {}: {}", url, e));
                    if !e.is_terminal() {
                        dlq.append_lossy(OP_UPSERT, entry.payload, &entry.reason);
                    }
                }
            }
        }
    }
    .instrument(log.span(&DlqPhase::Replay))
    .await;

    Ok(ReplayResult {
        taken,
        replayed,
        duplicates,
        skipped,
        failed,
    })
}

fn vector_from(payload: &serde_json::Value) -> Option<Vec<f32>> {
    payload["vector"]
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn appends_one_stream_per_operation() {
        let dir = TempDir::new().unwrap();
        let dlq = DeadLetterQueue::new(dir.path());
        dlq.append("qdrant_upsert", json!({"url": "http://a"}), "timeout")
            .unwrap();
        dlq.append("warehouse_write_events", json!({"k": 1}), "disabled")
            .unwrap();
        assert_eq!(dlq.scan("qdrant_upsert").unwrap().len(), 1);
        assert_eq!(dlq.scan("warehouse_write_events").unwrap().len(), 1);
        assert!(dlq.scan("other_op").unwrap().is_empty());
    }

    #[test]
    fn entries_carry_op_reason_and_timestamp() {
        let dir = TempDir::new().unwrap();
        let dlq = DeadLetterQueue::new(dir.path());
        dlq.append("qdrant_upsert", json!({"url": "http://a"}), "circuit_open")
            .unwrap();
        let entries = dlq.scan("qdrant_upsert").unwrap();
        assert_eq!(entries[0].op, "qdrant_upsert");
        assert_eq!(entries[0].reason, "circuit_open");
        assert_eq!(entries[0].payload["url"], "http://a");
    }

    #[test]
    fn take_drains_the_stream() {
        let dir = TempDir::new().unwrap();
        let dlq = DeadLetterQueue::new(dir.path());
        dlq.append("qdrant_upsert", json!({"url": "http://a"}), "timeout")
            .unwrap();
        let drained = dlq.take("qdrant_upsert").unwrap();
        assert_eq!(drained.len(), 1);
        assert!(dlq.scan("qdrant_upsert").unwrap().is_empty());
        // re-appending after a drain starts a fresh stream
        dlq.append("qdrant_upsert", json!({"url": "http://b"}), "timeout")
            .unwrap();
        assert_eq!(dlq.scan("qdrant_upsert").unwrap().len(), 1);
    }

    #[test]
    fn vector_from_reads_recorded_vectors_only() {
        assert_eq!(
            vector_from(&json!({"vector": [0.5, 1.0]})),
            Some(vec![0.5, 1.0])
        );
        assert!(vector_from(&json!({"vector_dim": 2})).is_none());
        assert!(vector_from(&json!({"vector": ["x"]})).is_none());
    }

    #[test]
    fn corrupt_lines_are_skipped_on_scan() {
        let dir = TempDir::new().unwrap();
        let dlq = DeadLetterQueue::new(dir.path());
        dlq.append("op", json!({"a": 1}), "boom").unwrap();
        let path = dir.path().join("dlq").join("op.jsonl");
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{truncated").unwrap();
        assert_eq!(dlq.scan("op").unwrap().len(), 1);
    }
}
