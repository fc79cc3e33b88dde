//! Feed polling loop: fetch upstream phishing feeds, collapse duplicates,
//! suppress recently-seen URLs and enqueue the remainder.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use reqwest::Client;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn, Instrument};

use crate::config::Settings;
use crate::domain::{canonical_domain, canonical_url};
use crate::queue::{IngestQueue, QueueRow};
use crate::seen::SeenCache;
use crate::telemetry::{self};
use crate::telemetry::ops::poll::Phase as PollPhase;

pub mod sources;

pub use sources::{FeedItem, FeedSource};

/// Hard floor on the cycle interval; configured values below this are clamped
/// so a misconfigured instance cannot hammer the upstream feeds.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(10);

const STARTUP_WARMUP: Duration = Duration::from_secs(2);
const STOP_GRACE: Duration = Duration::from_secs(5);
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Default)]
pub struct PollOpts {
    /// Bypass seen-URL suppression (sightings are still recorded).
    pub force: bool,
    /// Per-cycle enqueue cap; defaults to the configured batch limit.
    pub limit: Option<usize>,
    /// Restrict the cycle to one upstream feed.
    pub source: Option<FeedSource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollSummary {
    pub fetched: usize,
    pub merged: usize,
    pub suppressed: usize,
    pub enqueued: usize,
    pub push_errors: usize,
}

pub struct FeedPoller {
    client: Client,
    openphish_url: String,
    sinkingyachts_url: String,
    interval: Duration,
    batch_limit: usize,
    seen: SeenCache,
    queue: IngestQueue,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl FeedPoller {
    pub fn new(settings: &Settings, seen: SeenCache, queue: IngestQueue) -> Result<Self> {
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("failed to build feed HTTP client")?;
        Ok(Self {
            client,
            openphish_url: settings.openphish_feed_url.clone(),
            sinkingyachts_url: settings.sinkingyachts_feed_url.clone(),
            interval: settings.feed_poll_interval,
            batch_limit: settings.feed_batch_limit,
            seen,
            queue,
            running: Mutex::new(None),
        })
    }

    /// Spawns the background loop. Idempotent: a second call while the loop
    /// is alive is a no-op.
    pub async fn start(self: &Arc<Self>) {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(self).run_loop(token.clone()));
        *running = Some((token, handle));
    }

    /// Requests shutdown and waits up to the stop grace period; a loop that
    /// will not finish (e.g. stuck in a fetch) is aborted.
    pub async fn stop(&self) {
        let taken = self.running.lock().await.take();
        let Some((token, mut handle)) = taken else {
            return;
        };
        token.cancel();
        if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
            warn!("poll loop did not stop within grace period, aborting");
            handle.abort();
        }
    }

    async fn run_loop(self: Arc<Self>, token: CancellationToken) {
        let interval = self.interval.max(MIN_POLL_INTERVAL);
        // short warmup so dependencies brought up alongside us settle first
        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(STARTUP_WARMUP) => {}
        }
        loop {
            if let Err(e) = self.poll_once(&PollOpts::default()).await {
                error!(error = %e, "poll cycle failed");
            }
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// One full cycle: fetch, merge, suppress, enqueue.
    pub async fn poll_once(&self, opts: &PollOpts) -> Result<PollSummary> {
        let log = telemetry::poll();
        // span guards must not live across awaits (the loop is spawned, so
        // the future has to stay Send); awaited sections are instrumented
        let items = async {
            match opts.source {
                Some(FeedSource::OpenPhish) => {
                    sources::fetch_openphish(&self.client, &self.openphish_url).await
                }
                Some(FeedSource::SinkingYachts) => {
                    sources::fetch_sinkingyachts(
                        &self.client,
                        &self.sinkingyachts_url,
                        self.batch_limit,
                    )
                    .await
                }
                None => {
                    let (mut a, b) = tokio::join!(
                        sources::fetch_openphish(&self.client, &self.openphish_url),
                        sources::fetch_sinkingyachts(
                            &self.client,
                            &self.sinkingyachts_url,
                            self.batch_limit,
                        ),
                    );
                    a.extend(b);
                    a
                }
            }
        }
        .instrument(log.span(&PollPhase::Fetch))
        .await;
        Ok(self.ingest_batch(items, opts).await)
    }

    async fn ingest_batch(&self, items: Vec<FeedItem>, opts: &PollOpts) -> PollSummary {
        let log = telemetry::poll();
        let fetched = items.len();

        // batch-local first-wins dedup on the canonical URL form
        let merged_items: Vec<(String, FeedSource)> = {
            let _s = log.span(&PollPhase::Merge).entered();
            let mut keys = HashSet::new();
            items
                .into_iter()
                .filter_map(|item| {
                    let canon = canonical_url(&item.url);
                    keys.insert(canon.clone()).then_some((canon, item.source))
                })
                .collect()
        };
        let merged = merged_items.len();

        let mut suppressed = 0usize;
        let fresh: Vec<(String, FeedSource)> = async {
            let mut fresh = Vec::new();
            for (url, source) in merged_items {
                let is_new = self.seen.mark_if_new(&url).await;
                if is_new || opts.force {
                    fresh.push((url, source));
                } else {
                    suppressed += 1;
                }
            }
            fresh
        }
        .instrument(log.span(&PollPhase::Suppress))
        .await;

        let limit = opts.limit.unwrap_or(self.batch_limit);
        let mut enqueued = 0usize;
        let mut push_errors = 0usize;
        async {
            for (url, source) in fresh.into_iter().take(limit) {
                let domain = canonical_domain(&url);
                let row = QueueRow::new(url, domain.clone(), domain, source.as_str().to_string());
                match self.queue.push(&row).await {
                    Ok(()) => enqueued += 1,
                    Err(e) => {
                        push_errors += 1;
                        log.warn_kv(
                            "queue push failed, dropping row",
                            [("url", row.url.clone()), ("error", e.to_string())],
                        );
                    }
                }
            }
        }
        .instrument(log.span(&PollPhase::Enqueue))
        .await;

        let summary = PollSummary {
            fetched,
            merged,
            suppressed,
            enqueued,
            push_errors,
        };
        log.info_kv(
            "poll_cycle",
            [
                ("fetched", summary.fetched.to_string()),
                ("merged", summary.merged.to_string()),
                ("suppressed", summary.suppressed.to_string()),
                ("enqueued", summary.enqueued.to_string()),
                ("push_errors", summary.push_errors.to_string()),
            ],
        );
        summary
    }
}

/// phishfeed poll run/once
#[derive(Args)]
pub struct PollCmd {
    #[command(subcommand)]
    pub cmd: PollSub,
}

#[derive(Subcommand)]
pub enum PollSub {
    // poll continuously until interrupted
    Run,
    // one poll cycle, then exit
    Once {
        /// Enqueue even URLs already marked seen.
        #[arg(long, default_value_t = false)]
        force: bool,
        /// Cap on rows enqueued this cycle.
        #[arg(long)]
        limit: Option<usize>,
        /// Restrict to one feed: openphish | sinkingyachts.
        #[arg(long)]
        source: Option<String>,
    },
}

pub async fn run(settings: &Settings, args: PollCmd) -> Result<()> {
    let log = telemetry::poll();
    let _g = log.root_span().entered();
    let seen = SeenCache::new(settings.feed_seen_ttl, None);
    let queue = IngestQueue::new(&settings.buffer_dir)?;
    let poller = Arc::new(FeedPoller::new(settings, seen, queue)?);
    match args.cmd {
        PollSub::Run => {
            poller.start().await;
            log.info("⏳ Polling feeds — Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
            poller.stop().await;
            log.info("🛑 Poller stopped");
        }
        PollSub::Once {
            force,
            limit,
            source,
        } => {
            let source = source.map(|s| s.parse()).transpose()?;
            let summary = poller
                .poll_once(&PollOpts {
                    force,
                    limit,
                    source,
                })
                .await?;
            log.info(format!(
                "✅ Poll — fetched={} merged={} suppressed={} enqueued={}",
                summary.fetched, summary.merged, summary.suppressed, summary.enqueued
            ));
            if telemetry::config::json_mode() {
                log.result(&summary)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn poller(dir: &TempDir) -> FeedPoller {
        let mut settings = Settings::from_env();
        settings.buffer_dir = dir.path().to_path_buf();
        settings.feed_batch_limit = 200;
        let seen = SeenCache::new(Duration::from_secs(3600), None);
        let queue = IngestQueue::new(dir.path()).unwrap();
        FeedPoller::new(&settings, seen, queue).unwrap()
    }

    fn items(urls: &[&str]) -> Vec<FeedItem> {
        urls.iter()
            .map(|u| FeedItem {
                url: u.to_string(),
                source: FeedSource::OpenPhish,
            })
            .collect()
    }

    #[tokio::test]
    async fn host_variants_of_one_url_collapse_to_one_row() {
        let dir = TempDir::new().unwrap();
        let p = poller(&dir);
        let summary = p
            .ingest_batch(
                items(&["http://Example.com/a", "http://www.example.com/a"]),
                &PollOpts::default(),
            )
            .await;
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.merged, 1);
        assert_eq!(summary.enqueued, 1);

        let rows = p.queue.pop(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].domain, "example.com");
        assert_eq!(rows[0].url, "http://example.com/a");
        assert_eq!(rows[0].source, "openphish");
    }

    #[tokio::test]
    async fn second_cycle_suppresses_already_seen_urls() {
        let dir = TempDir::new().unwrap();
        let p = poller(&dir);
        let batch = items(&["http://example.com/a", "http://example.com/b"]);
        let first = p.ingest_batch(batch.clone(), &PollOpts::default()).await;
        assert_eq!(first.enqueued, 2);

        let second = p.ingest_batch(batch, &PollOpts::default()).await;
        assert_eq!(second.suppressed, 2);
        assert_eq!(second.enqueued, 0);
    }

    #[tokio::test]
    async fn force_bypasses_suppression() {
        let dir = TempDir::new().unwrap();
        let p = poller(&dir);
        let batch = items(&["http://example.com/a"]);
        p.ingest_batch(batch.clone(), &PollOpts::default()).await;

        let opts = PollOpts {
            force: true,
            ..Default::default()
        };
        let again = p.ingest_batch(batch, &opts).await;
        assert_eq!(again.suppressed, 0);
        assert_eq!(again.enqueued, 1);
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_is_bounded() {
        let dir = TempDir::new().unwrap();
        let p = Arc::new(poller(&dir));
        p.start().await;
        // second start while the loop is alive is a no-op
        p.start().await;
        assert!(p.running.lock().await.is_some());
        p.stop().await;
        assert!(p.running.lock().await.is_none());
        // stopping an already-stopped poller is a no-op
        p.stop().await;
    }

    #[tokio::test]
    async fn limit_caps_enqueued_rows() {
        let dir = TempDir::new().unwrap();
        let p = poller(&dir);
        let batch = items(&[
            "http://example.com/a",
            "http://example.com/b",
            "http://example.com/c",
        ]);
        let opts = PollOpts {
            limit: Some(2),
            ..Default::default()
        };
        let summary = p.ingest_batch(batch, &opts).await;
        assert_eq!(summary.merged, 3);
        assert_eq!(summary.enqueued, 2);
    }
}
