use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod qdrant;

pub use qdrant::QdrantHttp;

/// Stored payload for one URL point. Required fields are typed; arbitrary
/// caller metadata survives in `extra` without being load-bearing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointPayload {
    pub url: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<i64>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One nearest-neighbor result. `similarity` is cosine similarity in [0, 1];
/// the dedup floors depend on this scale.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub similarity: f32,
    pub payload: PointPayload,
}

/// Deterministic point id for a URL: UUIDv5 in the URL namespace, so
/// repeated upserts of the same URL overwrite the same point.
pub fn point_id(url: &str) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes())
}

/// The vector store collaborator. Implemented over Qdrant's REST API in
/// production and by in-memory fixtures in tests.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Creates the collection if missing; recreates it when the existing
    /// vector size disagrees with `dim`.
    async fn ensure_collection(&self, dim: usize) -> anyhow::Result<()>;

    /// Best-effort creation of the payload indexes used by filtered search.
    async fn ensure_payload_indexes(&self) -> anyhow::Result<()>;

    /// Idempotent write keyed by [`point_id`]; returns the point id.
    async fn upsert(
        &self,
        url: &str,
        vector: &[f32],
        payload: &PointPayload,
    ) -> anyhow::Result<String>;

    /// Top-k nearest neighbors, optionally restricted to one stored domain.
    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        domain: Option<&str>,
    ) -> anyhow::Result<Vec<SearchHit>>;
}
