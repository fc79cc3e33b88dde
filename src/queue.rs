use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{warn, Instrument};

use crate::config::Settings;
use crate::domain::{canonical_domain, canonical_url};
use crate::telemetry::ops::queue::Phase as QueuePhase;
use crate::telemetry::{self};

/// One normalized feed row. Append-only in the queue file; removed exactly
/// once when popped. `domain` is always the canonical domain of `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRow {
    pub url: String,
    pub domain: String,
    pub title: String,
    pub enqueued_at: i64,
    pub source: String,
}

impl QueueRow {
    pub fn new(url: String, domain: String, title: String, source: String) -> Self {
        Self {
            url,
            domain,
            title,
            enqueued_at: Utc::now().timestamp(),
            source,
        }
    }
}

/// Default and hard cap for `pop` batch sizes.
pub const POP_DEFAULT_LIMIT: usize = 10;
pub const POP_MAX_LIMIT: usize = 50;

const LOCK_RETRIES: u32 = 50;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Crash-safe file-backed FIFO of queue rows, shared by producers and
/// consumers on the same filesystem. One JSON row per line; a cooperative
/// lock file serializes push/pop across cooperating processes.
///
/// `pop` removes rows before returning them, so delivery is at-least-once in
/// the aggregate: a crash between the rewrite and downstream handling loses
/// that batch. Accepted tradeoff — this is a buffer, not a transaction log.
pub struct IngestQueue {
    queue_file: PathBuf,
    lock_file: PathBuf,
}

impl IngestQueue {
    pub fn new(buffer_dir: &Path) -> Result<Self> {
        fs::create_dir_all(buffer_dir)
            .with_context(|| format!("create buffer dir {}", buffer_dir.display()))?;
        Ok(Self {
            queue_file: buffer_dir.join("incoming.jsonl"),
            lock_file: buffer_dir.join(".incoming.lock"),
        })
    }

    async fn lock(&self) -> LockGuard {
        for _ in 0..LOCK_RETRIES {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.lock_file)
            {
                Ok(_) => return LockGuard { path: self.lock_file.clone() },
                Err(_) => tokio::time::sleep(LOCK_RETRY_DELAY).await,
            }
        }
        // Lock appears stuck (crashed holder). Proceed best-effort rather
        // than deadlock; the guard will clear the stale file on drop.
        warn!(lock = %self.lock_file.display(), "queue lock appears stuck, proceeding");
        LockGuard { path: self.lock_file.clone() }
    }

    /// Appends one row. FIFO order of successfully pushed rows is preserved;
    /// ordering between concurrent pushers is not defined.
    pub async fn push(&self, row: &QueueRow) -> Result<()> {
        let _guard = self.lock().await;
        let mut line = serde_json::to_string(row)?;
        line.push('\n');
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.queue_file)
            .with_context(|| format!("open queue file {}", self.queue_file.display()))?;
        f.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Removes and returns up to `limit` rows from the head of the queue
    /// (clamped to [`POP_MAX_LIMIT`]). Unparseable lines are skipped so one
    /// corrupt line never blocks the rest of the queue.
    pub async fn pop(&self, limit: usize) -> Result<Vec<QueueRow>> {
        let limit = limit.min(POP_MAX_LIMIT);
        let _guard = self.lock().await;

        let content = match fs::read_to_string(&self.queue_file) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).context("read queue file"),
        };
        let lines: Vec<&str> = content.lines().collect();
        if lines.is_empty() {
            return Ok(Vec::new());
        }

        let take = limit.min(lines.len());
        let rest = &lines[take..];

        if rest.is_empty() {
            // Queue drained; remove the backing file entirely.
            match fs::remove_file(&self.queue_file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).context("remove drained queue file"),
            }
        } else {
            // Atomically rewrite the remainder: temp file then rename.
            let tmp = self.queue_file.with_extension("jsonl.tmp");
            let mut body = rest.join("\n");
            body.push('\n');
            fs::write(&tmp, body).context("write queue remainder")?;
            fs::rename(&tmp, &self.queue_file).context("replace queue file")?;
        }

        let mut out = Vec::with_capacity(take);
        for line in &lines[..take] {
            match serde_json::from_str::<QueueRow>(line) {
                Ok(row) => out.push(row),
                Err(e) => warn!(error = %e, "skipping corrupt queue line"),
            }
        }
        Ok(out)
    }
}

/// phishfeed queue push/pop
#[derive(Args)]
pub struct QueueCmd {
    #[command(subcommand)]
    pub cmd: QueueSub,
}

#[derive(Subcommand)]
pub enum QueueSub {
    // enqueue one URL by hand
    Push {
        url: String,
        /// Source label recorded on the row.
        #[arg(long, default_value = "manual")]
        source: String,
    },
    // remove and print rows from the head of the queue
    Pop {
        #[arg(long, default_value_t = POP_DEFAULT_LIMIT)]
        limit: usize,
    },
}

#[derive(Serialize)]
struct PopResult {
    count: usize,
    rows: Vec<QueueRow>,
}

pub async fn run(settings: &Settings, args: QueueCmd) -> Result<()> {
    let log = telemetry::queue();
    let _g = log.root_span().entered();
    let queue = IngestQueue::new(&settings.buffer_dir)?;
    match args.cmd {
        QueueSub::Push { url, source } => {
            let canon = canonical_url(&url);
            let domain = canonical_domain(&canon);
            let row = QueueRow::new(canon, domain.clone(), domain, source);
            queue
                .push(&row)
                .instrument(log.span(&QueuePhase::Push))
                .await?;
            log.info(format!("➕ Enqueued {}", row.url));
            if telemetry::config::json_mode() {
                log.result(&row)?;
            }
        }
        QueueSub::Pop { limit } => {
            let rows = queue
                .pop(limit)
                .instrument(log.span(&QueuePhase::Pop))
                .await?;
            log.info(format!("📤 Popped {} row(s)", rows.len()));
            for r in &rows {
                log.info(format!("  {} [{}]", r.url, r.source));
            }
            if telemetry::config::json_mode() {
                let count = rows.len();
                log.result(&PopResult { count, rows })?;
            }
        }
    }
    Ok(())
}

struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(url: &str) -> QueueRow {
        QueueRow::new(
            url.to_string(),
            crate::domain::canonical_domain(url),
            "t".to_string(),
            "openphish".to_string(),
        )
    }

    #[tokio::test]
    async fn push_then_pop_roundtrips_one_row() {
        let dir = TempDir::new().unwrap();
        let q = IngestQueue::new(dir.path()).unwrap();
        let r = row("http://example.com/a");
        q.push(&r).await.unwrap();
        let got = q.pop(1).await.unwrap();
        assert_eq!(got, vec![r]);
    }

    #[tokio::test]
    async fn popping_everything_leaves_empty_store() {
        let dir = TempDir::new().unwrap();
        let q = IngestQueue::new(dir.path()).unwrap();
        q.push(&row("http://example.com/a")).await.unwrap();
        q.push(&row("http://example.com/b")).await.unwrap();
        let got = q.pop(10).await.unwrap();
        assert_eq!(got.len(), 2);
        assert!(q.pop(10).await.unwrap().is_empty());
        assert!(!dir.path().join("incoming.jsonl").exists());
    }

    #[tokio::test]
    async fn batched_pops_preserve_fifo_order() {
        let dir = TempDir::new().unwrap();
        let q = IngestQueue::new(dir.path()).unwrap();
        let rows: Vec<QueueRow> = (0..7)
            .map(|i| row(&format!("http://example.com/{}", i)))
            .collect();
        for r in &rows {
            q.push(r).await.unwrap();
        }
        let mut popped = Vec::new();
        loop {
            let batch = q.pop(3).await.unwrap();
            if batch.is_empty() {
                break;
            }
            popped.extend(batch);
        }
        assert_eq!(popped, rows);
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let q = IngestQueue::new(dir.path()).unwrap();
        q.push(&row("http://example.com/a")).await.unwrap();
        {
            let mut f = OpenOptions::new()
                .append(true)
                .open(dir.path().join("incoming.jsonl"))
                .unwrap();
            f.write_all(b"{not json\n").unwrap();
        }
        q.push(&row("http://example.com/b")).await.unwrap();
        let got = q.pop(10).await.unwrap();
        let urls: Vec<&str> = got.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["http://example.com/a", "http://example.com/b"]);
    }

    #[tokio::test]
    async fn pop_clamps_to_hard_cap() {
        let dir = TempDir::new().unwrap();
        let q = IngestQueue::new(dir.path()).unwrap();
        for i in 0..(POP_MAX_LIMIT + 5) {
            q.push(&row(&format!("http://example.com/{}", i)))
                .await
                .unwrap();
        }
        let got = q.pop(1000).await.unwrap();
        assert_eq!(got.len(), POP_MAX_LIMIT);
    }

    #[tokio::test]
    async fn stale_lock_does_not_deadlock() {
        let dir = TempDir::new().unwrap();
        let q = IngestQueue::new(dir.path()).unwrap();
        fs::write(dir.path().join(".incoming.lock"), b"").unwrap();
        // push proceeds after the bounded spin and clears the stale lock
        q.push(&row("http://example.com/a")).await.unwrap();
        assert_eq!(q.pop(1).await.unwrap().len(), 1);
    }
}
