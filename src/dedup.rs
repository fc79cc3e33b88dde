//! Domain-aware near-duplicate decision engine.
//!
//! Same-domain neighbors get a lower similarity floor than cross-domain
//! ones: URLs from one phishing campaign are expected to be textually
//! close, while an accidental cross-domain collision must clear a much
//! stricter bar before we merge it.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{warn, Instrument};

use crate::domain::canonical_domain;
use crate::error::{CallError, CallResult};
use crate::resilience::Resilient;
use crate::store::{PointPayload, SearchHit, VectorStore};
use crate::telemetry::ops::decide::Phase as DecidePhase;
use crate::telemetry::{self};

pub const OP_SEARCH: &str = "qdrant_search";
pub const OP_UPSERT: &str = "qdrant_upsert";

#[derive(Debug, Clone, Serialize)]
pub struct DedupDecision {
    pub is_duplicate: bool,
    pub similarity: f32,
    pub matched_point_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Floors {
    pub same_domain: f32,
    pub global: f32,
}

impl Default for Floors {
    fn default() -> Self {
        Self {
            same_domain: 0.94,
            global: 0.985,
        }
    }
}

/// Duplicate rule: inclusive floor comparison, floor chosen by whether the
/// best match shares the query's canonical domain.
pub fn is_duplicate(similarity: f32, same_domain: bool, floors: &Floors) -> bool {
    let floor = if same_domain {
        floors.same_domain
    } else {
        floors.global
    };
    similarity >= floor
}

pub struct DedupEngine {
    store: Arc<dyn VectorStore>,
    resilient: Resilient,
    floors: Floors,
    top_k: usize,
    expected_dim: Option<usize>,
}

impl DedupEngine {
    pub fn new(
        store: Arc<dyn VectorStore>,
        resilient: Resilient,
        floors: Floors,
        top_k: usize,
        expected_dim: Option<usize>,
    ) -> Self {
        Self {
            store,
            resilient,
            floors,
            top_k,
            expected_dim,
        }
    }

    /// Decides whether `url` duplicates a stored point and records it either
    /// way. The caller-supplied domain is never trusted: it is re-derived
    /// from the URL and forced into the stored payload.
    ///
    /// A failed neighbor search degrades to "no candidates" (fail open
    /// toward "new"); a failed upsert is dead-lettered and propagated —
    /// the write is the operation's primary persisted effect and is never
    /// swallowed.
    pub async fn decide_and_record(
        &self,
        url: &str,
        vector: &[f32],
        mut payload: PointPayload,
    ) -> CallResult<DedupDecision> {
        if vector.is_empty() {
            return Err(CallError::InvalidInput {
                op: OP_UPSERT,
                reason: "empty vector".into(),
            });
        }
        if let Some(dim) = self.expected_dim {
            if vector.len() != dim {
                return Err(CallError::InvalidInput {
                    op: OP_UPSERT,
                    reason: format!("vector dimension {} != expected {}", vector.len(), dim),
                });
            }
        }

        let domain = canonical_domain(url);
        payload.url = url.to_string();
        payload.domain = domain.clone();

        let hits = self.nearest_neighbors(url, vector, &domain).await;
        let best = hits
            .into_iter()
            .max_by(|a, b| a.similarity.total_cmp(&b.similarity));

        let (similarity, matched, same_dom) = match &best {
            Some(hit) => {
                let same = !domain.is_empty()
                    && !hit.payload.domain.is_empty()
                    && hit.payload.domain == domain;
                (hit.similarity, Some(hit.id.clone()), same)
            }
            None => (0.0, None, false),
        };
        let duplicate = best.is_some() && is_duplicate(similarity, same_dom, &self.floors);

        let dlq_payload = json!({
            "url": url,
            "domain": domain,
            "vector_dim": vector.len(),
            "payload": &payload,
        });
        self.resilient
            .call(OP_UPSERT, dlq_payload, || async {
                self.store.upsert(url, vector, &payload).await
            })
            .instrument(telemetry::decide().span(&DecidePhase::Upsert))
            .await?;

        Ok(DedupDecision {
            is_duplicate: duplicate,
            similarity,
            // Below-floor neighbors stay private: the id is only meaningful
            // when we actually matched.
            matched_point_id: if duplicate { matched } else { None },
        })
    }

    /// Same-domain candidates first; when that restricted search returns
    /// nothing (or the domain is empty), fall back to a global search.
    async fn nearest_neighbors(&self, url: &str, vector: &[f32], domain: &str) -> Vec<SearchHit> {
        let log = telemetry::decide();
        let dlq_payload = json!({ "url": url, "domain": domain, "vector_dim": vector.len() });

        if !domain.is_empty() {
            match self
                .resilient
                .call(OP_SEARCH, dlq_payload.clone(), || async {
                    self.store.search(vector, self.top_k, Some(domain)).await
                })
                .instrument(log.span(&DecidePhase::SearchDomain))
                .await
            {
                Ok(hits) if !hits.is_empty() => return hits,
                Ok(_) => {}
                Err(e) => {
                    warn!(url, error = %e, "same-domain search failed, treating as no candidates");
                    return Vec::new();
                }
            }
        }

        match self
            .resilient
            .call(OP_SEARCH, dlq_payload, || async {
                self.store.search(vector, self.top_k, None).await
            })
            .instrument(log.span(&DecidePhase::SearchGlobal))
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                warn!(url, error = %e, "global search failed, treating as no candidates");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dlq::DeadLetterQueue;
    use crate::resilience::{ResilienceConfig, RetryPolicy};
    use crate::store::point_id;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::Mutex;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            return 0.0;
        }
        dot / (na * nb)
    }

    #[derive(Default)]
    struct InMemoryStore {
        points: Mutex<HashMap<String, (Vec<f32>, PointPayload)>>,
        fail_search: bool,
        fail_upsert: bool,
    }

    #[async_trait]
    impl VectorStore for InMemoryStore {
        async fn ensure_collection(&self, _dim: usize) -> anyhow::Result<()> {
            Ok(())
        }

        async fn ensure_payload_indexes(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn upsert(
            &self,
            url: &str,
            vector: &[f32],
            payload: &PointPayload,
        ) -> anyhow::Result<String> {
            if self.fail_upsert {
                anyhow::bail!("qdrant unavailable")
            }
            let id = point_id(url).to_string();
            self.points
                .lock()
                .await
                .insert(id.clone(), (vector.to_vec(), payload.clone()));
            Ok(id)
        }

        async fn search(
            &self,
            vector: &[f32],
            top_k: usize,
            domain: Option<&str>,
        ) -> anyhow::Result<Vec<SearchHit>> {
            if self.fail_search {
                anyhow::bail!("qdrant unavailable")
            }
            let points = self.points.lock().await;
            let mut hits: Vec<SearchHit> = points
                .iter()
                .filter(|(_, (_, p))| domain.map(|d| p.domain == d).unwrap_or(true))
                .map(|(id, (v, p))| SearchHit {
                    id: id.clone(),
                    similarity: cosine(vector, v),
                    payload: p.clone(),
                })
                .collect();
            hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
            hits.truncate(top_k);
            Ok(hits)
        }
    }

    fn fast_resilient(dlq: DeadLetterQueue) -> Resilient {
        Resilient::new(
            ResilienceConfig {
                rps: 10_000.0,
                call_timeout: Duration::from_millis(500),
                retry: RetryPolicy {
                    max_attempts: 2,
                    initial_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(2),
                    multiplier: 2.0,
                },
                failure_threshold: 100,
                recovery_time: Duration::from_secs(10),
            },
            dlq,
        )
    }

    fn engine(store: Arc<InMemoryStore>, dlq: DeadLetterQueue) -> DedupEngine {
        DedupEngine::new(store, fast_resilient(dlq), Floors::default(), 5, None)
    }

    fn payload_for(url: &str) -> PointPayload {
        PointPayload {
            url: url.to_string(),
            domain: String::new(),
            title: Some("login".into()),
            source: Some("openphish".into()),
            ..Default::default()
        }
    }

    #[test]
    fn floors_are_inclusive_and_domain_aware() {
        let floors = Floors::default();
        assert!(is_duplicate(0.94, true, &floors));
        assert!(!is_duplicate(0.9399, true, &floors));
        assert!(is_duplicate(0.985, false, &floors));
        assert!(!is_duplicate(0.9849, false, &floors));
        // a score clearing only the lax floor is not a cross-domain dup
        assert!(is_duplicate(0.95, true, &floors));
        assert!(!is_duplicate(0.95, false, &floors));
    }

    #[tokio::test]
    async fn first_sighting_is_new_then_near_vector_is_duplicate() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::default());
        let eng = engine(store.clone(), DeadLetterQueue::new(dir.path()));

        let url = "http://example.com/login";
        let first = eng
            .decide_and_record(url, &[1.0, 0.0, 0.0], payload_for(url))
            .await
            .unwrap();
        assert!(!first.is_duplicate);
        assert_eq!(first.similarity, 0.0);
        assert!(first.matched_point_id.is_none());

        let second = eng
            .decide_and_record(
                "http://example.com/login2",
                &[0.999, 0.04, 0.0],
                payload_for("http://example.com/login2"),
            )
            .await
            .unwrap();
        assert!(second.is_duplicate);
        assert!(second.similarity >= 0.94);
        assert_eq!(
            second.matched_point_id.as_deref(),
            Some(point_id(url).to_string().as_str())
        );
    }

    #[tokio::test]
    async fn cross_domain_match_needs_the_strict_floor() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::default());
        let eng = engine(store.clone(), DeadLetterQueue::new(dir.path()));

        eng.decide_and_record(
            "http://other.org/login",
            &[1.0, 0.0],
            payload_for("http://other.org/login"),
        )
        .await
        .unwrap();

        // ~0.97 similarity: over the same-domain floor, under the global one
        let decision = eng
            .decide_and_record(
                "http://example.com/login",
                &[0.97, 0.2430],
                payload_for("http://example.com/login"),
            )
            .await
            .unwrap();
        assert!(decision.similarity > 0.94 && decision.similarity < 0.985);
        assert!(!decision.is_duplicate);
        assert!(decision.matched_point_id.is_none());
    }

    #[tokio::test]
    async fn caller_domain_is_overwritten_with_canonical() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::default());
        let eng = engine(store.clone(), DeadLetterQueue::new(dir.path()));

        let mut payload = payload_for("http://WWW.Example.com/a");
        payload.domain = "attacker-chosen.net".into();
        eng.decide_and_record("http://WWW.Example.com/a", &[1.0, 0.0], payload)
            .await
            .unwrap();

        let points = store.points.lock().await;
        let (_, stored) = points.values().next().unwrap();
        assert_eq!(stored.domain, "example.com");
    }

    #[tokio::test]
    async fn failed_search_fails_open_but_failed_upsert_raises() {
        let dir = TempDir::new().unwrap();
        let dlq = DeadLetterQueue::new(dir.path());
        let store = Arc::new(InMemoryStore {
            fail_search: true,
            fail_upsert: true,
            ..Default::default()
        });
        let eng = engine(store, dlq.clone());

        let err = eng
            .decide_and_record(
                "http://example.com/a",
                &[1.0, 0.0],
                payload_for("http://example.com/a"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::RetriesExhausted { .. }));

        // search fail-open dead-letters under its own op; the upsert entry
        // carries enough to identify the lost write (but not the vector)
        let upserts = dlq.scan(OP_UPSERT).unwrap();
        assert_eq!(upserts.len(), 1);
        assert_eq!(upserts[0].payload["url"], "http://example.com/a");
        assert_eq!(upserts[0].payload["vector_dim"], 2);
        assert!(upserts[0].payload.get("vector").is_none());
    }

    #[tokio::test]
    async fn failed_search_alone_still_records_and_reports_new() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore {
            fail_search: true,
            ..Default::default()
        });
        let eng = engine(store.clone(), DeadLetterQueue::new(dir.path()));

        let decision = eng
            .decide_and_record(
                "http://example.com/a",
                &[1.0, 0.0],
                payload_for("http://example.com/a"),
            )
            .await
            .unwrap();
        assert!(!decision.is_duplicate);
        assert_eq!(decision.similarity, 0.0);
        assert_eq!(store.points.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn empty_vector_is_rejected_without_retry() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::default());
        let eng = engine(store, DeadLetterQueue::new(dir.path()));
        let err = eng
            .decide_and_record("http://example.com/a", &[], payload_for("http://example.com/a"))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::default());
        let eng = DedupEngine::new(
            store,
            fast_resilient(DeadLetterQueue::new(dir.path())),
            Floors::default(),
            5,
            Some(3),
        );
        let err = eng
            .decide_and_record(
                "http://example.com/a",
                &[1.0, 0.0],
                payload_for("http://example.com/a"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn malformed_url_falls_back_to_global_comparison() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(InMemoryStore::default());
        let eng = engine(store.clone(), DeadLetterQueue::new(dir.path()));

        eng.decide_and_record("http://example.com/a", &[1.0, 0.0], payload_for("http://example.com/a"))
            .await
            .unwrap();

        // unparseable URL: empty domain, so only the strict global floor applies
        let decision = eng
            .decide_and_record("not a url", &[1.0, 0.001], payload_for("not a url"))
            .await
            .unwrap();
        assert!(decision.similarity >= 0.985);
        assert!(decision.is_duplicate);
    }
}
