use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::Instrument;

use crate::config::Settings;
use crate::embed::{Embedder, OllamaEmbedder};
use crate::store::{QdrantHttp, VectorStore};
use crate::telemetry::ops::init::Phase as InitPhase;
use crate::telemetry::{self};

/// phishfeed init
#[derive(Args)]
pub struct InitCmd {
    /// Embedding dimension; omit to probe the configured model.
    #[arg(long)]
    pub dim: Option<usize>,
}

#[derive(Serialize)]
struct InitResult {
    collection: String,
    dim: usize,
}

pub async fn run(settings: &Settings, args: InitCmd) -> Result<()> {
    let log = telemetry::init();
    let _g = log
        .root_span_kv([("dim", format!("{:?}", args.dim))])
        .entered();

    let dim = match args.dim {
        Some(d) => d,
        None => {
            let embedder = OllamaEmbedder::new(
                &settings.ollama_base_url,
                &settings.embed_model_name,
                settings.ollama_timeout,
            )?;
            let dim = embedder
                .dim()
                .instrument(log.span(&InitPhase::ProbeDim))
                .await?;
            log.info(format!(
                "📐 Model '{}' produces dim={}",
                settings.embed_model_name, dim
            ));
            dim
        }
    };

    let store = QdrantHttp::new(
        &settings.qdrant_url,
        &settings.qdrant_collection,
        settings.qdrant_timeout,
    )?;
    store
        .ensure_collection(dim)
        .instrument(log.span(&InitPhase::EnsureCollection))
        .await?;
    store
        .ensure_payload_indexes()
        .instrument(log.span(&InitPhase::EnsureIndexes))
        .await?;

    log.info(format!(
        "✅ Collection '{}' ready (dim={})",
        settings.qdrant_collection, dim
    ));
    if telemetry::config::json_mode() {
        log.result(&InitResult {
            collection: settings.qdrant_collection.clone(),
            dim,
        })?;
    }
    Ok(())
}
