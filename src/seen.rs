use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::warn;

/// Atomic "set if absent, with TTL" primitive, e.g. Redis SET NX EX. The
/// shared variant is what makes suppression exact across instances; without
/// it we degrade to the process-local cache below.
#[async_trait]
pub trait SeenStore: Send + Sync {
    async fn set_if_absent(&self, key: &str, ttl: Duration) -> anyhow::Result<bool>;
}

/// Namespaced cache key for a raw URL. Hashing bounds key length and avoids
/// storing attacker-controlled URLs verbatim in the backing store.
pub fn seen_key(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("seen:url:{:x}", digest)
}

/// Bounded process-local fallback. Suppression is approximate here: capacity
/// eviction can re-admit an old URL, so a previously-seen URL may be treated
/// as new again. Accepted tradeoff in single-instance mode.
struct LocalSeenCache {
    entries: HashMap<String, Instant>,
    order: VecDeque<String>,
    max_entries: usize,
}

impl LocalSeenCache {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_entries,
        }
    }

    fn mark_if_new(&mut self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        if let Some(inserted) = self.entries.get(key) {
            if now.duration_since(*inserted) < ttl {
                return false;
            }
            // expired: fall through and re-insert
        }
        self.entries.insert(key.to_string(), now);
        self.order.push_back(key.to_string());
        self.evict(ttl, now);
        true
    }

    fn evict(&mut self, ttl: Duration, now: Instant) {
        // TTL eviction first, then capacity pressure (oldest insertion wins).
        while let Some(front) = self.order.front() {
            let expired = match self.entries.get(front) {
                Some(at) => now.duration_since(*at) >= ttl,
                None => true, // stale order entry from a re-insert
            };
            if !expired {
                break;
            }
            if let Some(key) = self.order.pop_front() {
                if let Some(at) = self.entries.get(&key) {
                    if now.duration_since(*at) >= ttl {
                        self.entries.remove(&key);
                    }
                }
            }
        }
        while self.entries.len() > self.max_entries {
            match self.order.pop_front() {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

/// URL-level "have I processed this exact URL recently" gate.
///
/// Prefers the shared store; any error talking to it is swallowed and the
/// local cache decides instead (fail open toward re-processing — we never
/// silently drop data because a cache was unreachable).
pub struct SeenCache {
    ttl: Duration,
    shared: Option<Arc<dyn SeenStore>>,
    local: Mutex<LocalSeenCache>,
}

pub const LOCAL_SEEN_MAX_ENTRIES: usize = 10_000;

impl SeenCache {
    pub fn new(ttl: Duration, shared: Option<Arc<dyn SeenStore>>) -> Self {
        Self {
            ttl,
            shared,
            local: Mutex::new(LocalSeenCache::new(LOCAL_SEEN_MAX_ENTRIES)),
        }
    }

    /// Returns true exactly once per distinct URL within the TTL window.
    pub async fn mark_if_new(&self, url: &str) -> bool {
        let key = seen_key(url);
        if let Some(store) = &self.shared {
            match store.set_if_absent(&key, self.ttl).await {
                Ok(added) => return added,
                Err(e) => {
                    warn!(error = %e, "seen store unavailable, using local cache");
                }
            }
        }
        self.local.lock().await.mark_if_new(&key, self.ttl)
    }
}
