//! Qdrant REST client for the URL point collection.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use super::{point_id, PointPayload, SearchHit, VectorStore};

pub struct QdrantHttp {
    client: Client,
    base: String,
    collection: String,
}

impl QdrantHttp {
    pub fn new(base_url: &str, collection: &str, timeout: Duration) -> Result<Self> {
        anyhow::ensure!(
            base_url.starts_with("http://") || base_url.starts_with("https://"),
            "Qdrant URL must be an http(s) URL"
        );
        anyhow::ensure!(!collection.trim().is_empty(), "missing collection name");
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build Qdrant HTTP client")?;
        Ok(Self {
            client,
            base: base_url.trim_end_matches('/').to_string(),
            collection: collection.to_string(),
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{}", self.base, self.collection, suffix)
    }

    async fn existing_vector_size(&self) -> Option<usize> {
        let resp = self
            .client
            .get(self.collection_url(""))
            .send()
            .await
            .ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let info: CollectionInfoResponse = resp.json().await.ok()?;
        Some(info.result.config.params.vectors.size)
    }

    async fn create_collection(&self, dim: usize) -> Result<()> {
        let body = json!({ "vectors": { "size": dim, "distance": "Cosine" } });
        let resp = self
            .client
            .put(self.collection_url(""))
            .json(&body)
            .send()
            .await
            .context("create collection request")?;
        anyhow::ensure!(
            resp.status().is_success(),
            "create collection failed ({})",
            resp.status()
        );
        Ok(())
    }

    async fn create_payload_index(&self, field: &str, schema: &str) {
        let body = json!({ "field_name": field, "field_schema": schema });
        let result = self
            .client
            .put(self.collection_url("/index"))
            .json(&body)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(field, schema, "payload index ensured");
            }
            // Index creation is idempotent-ish; an existing index or an old
            // server version must not block startup.
            Ok(resp) => warn!(field, status = %resp.status(), "payload index not created"),
            Err(e) => warn!(field, error = %e, "payload index request failed"),
        }
    }
}

#[async_trait]
impl VectorStore for QdrantHttp {
    async fn ensure_collection(&self, dim: usize) -> Result<()> {
        match self.existing_vector_size().await {
            Some(size) if size == dim => Ok(()),
            Some(_) => {
                // Dimension changed (new embedding model): drop and recreate.
                let resp = self
                    .client
                    .delete(self.collection_url(""))
                    .send()
                    .await
                    .context("delete collection request")?;
                anyhow::ensure!(
                    resp.status().is_success(),
                    "delete collection failed ({})",
                    resp.status()
                );
                self.create_collection(dim).await
            }
            None => self.create_collection(dim).await,
        }
    }

    async fn ensure_payload_indexes(&self) -> Result<()> {
        self.create_payload_index("domain", "keyword").await;
        self.create_payload_index("enqueued_at", "integer").await;
        Ok(())
    }

    async fn upsert(&self, url: &str, vector: &[f32], payload: &PointPayload) -> Result<String> {
        let id = point_id(url).to_string();
        let body = json!({
            "points": [{ "id": id, "vector": vector, "payload": payload }]
        });
        let resp = self
            .client
            .put(self.collection_url("/points?wait=true"))
            .json(&body)
            .send()
            .await
            .context("upsert request")?;
        let status = resp.status();
        anyhow::ensure!(
            status.is_success(),
            "upsert failed ({}): {}",
            status,
            resp.text().await.unwrap_or_else(|_| "<body unavailable>".into())
        );
        Ok(id)
    }

    async fn search(
        &self,
        vector: &[f32],
        top_k: usize,
        domain: Option<&str>,
    ) -> Result<Vec<SearchHit>> {
        let mut body = json!({
            "vector": vector,
            "limit": top_k,
            "with_payload": true,
        });
        if let Some(d) = domain {
            body["filter"] = json!({
                "must": [{ "key": "domain", "match": { "value": d } }]
            });
        }
        let resp = self
            .client
            .post(self.collection_url("/points/search"))
            .json(&body)
            .send()
            .await
            .context("search request")?;
        let status = resp.status();
        anyhow::ensure!(
            status.is_success(),
            "search failed ({}): {}",
            status,
            resp.text().await.unwrap_or_else(|_| "<body unavailable>".into())
        );
        let parsed: SearchResponse = resp.json().await.context("parse search response")?;
        Ok(parsed
            .result
            .into_iter()
            .map(|p| SearchHit {
                id: id_to_string(p.id),
                similarity: p.score,
                payload: p.payload.unwrap_or_default(),
            })
            .collect())
    }
}

// Point ids come back as either UUID strings or integers.
fn id_to_string(v: serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

#[derive(Deserialize)]
struct CollectionInfoResponse {
    result: CollectionInfo,
}

#[derive(Deserialize)]
struct CollectionInfo {
    config: CollectionConfig,
}

#[derive(Deserialize)]
struct CollectionConfig {
    params: CollectionParams,
}

#[derive(Deserialize)]
struct CollectionParams {
    vectors: VectorParams,
}

#[derive(Serialize, Deserialize)]
struct VectorParams {
    size: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: Option<PointPayload>,
}
