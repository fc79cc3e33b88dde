//! Optional analytics warehouse sink for decision events and receipts.
//!
//! The backend is pluggable; when none is configured every write fails fast
//! with a `Disabled` error so callers can tell "not set up" apart from "set
//! up and broken".

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CallError, CallResult};
use crate::resilience::Resilient;

pub const OP_WRITE_EVENTS: &str = "warehouse_write_events";
pub const OP_WRITE_RECEIPTS: &str = "warehouse_write_receipts";

pub const EVENTS_TABLE: &str = "url_events";
pub const RECEIPTS_TABLE: &str = "ingest_receipts";

/// Row-oriented warehouse backend (e.g. a columnar store's streaming insert
/// API). Rows are self-describing JSON objects.
#[async_trait]
pub trait WarehouseBackend: Send + Sync {
    async fn insert_rows(&self, table: &str, rows: &[Value]) -> anyhow::Result<()>;
}

pub struct WarehouseSink {
    backend: Option<Arc<dyn WarehouseBackend>>,
    resilient: Resilient,
}

impl WarehouseSink {
    pub fn new(backend: Option<Arc<dyn WarehouseBackend>>, resilient: Resilient) -> Self {
        Self { backend, resilient }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// One row per dedup decision.
    pub async fn write_events(&self, rows: &[Value]) -> CallResult<()> {
        self.write(OP_WRITE_EVENTS, EVENTS_TABLE, rows).await
    }

    /// One row per accepted submission, for end-to-end reconciliation.
    pub async fn write_receipts(&self, rows: &[Value]) -> CallResult<()> {
        self.write(OP_WRITE_RECEIPTS, RECEIPTS_TABLE, rows).await
    }

    async fn write(&self, op: &'static str, table: &str, rows: &[Value]) -> CallResult<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let Some(backend) = &self.backend else {
            return Err(CallError::Disabled { op });
        };
        let dlq_payload = serde_json::json!({ "table": table, "rows": rows });
        self.resilient
            .call(op, dlq_payload, || async {
                backend.insert_rows(table, rows).await
            })
            .await
    }
}
