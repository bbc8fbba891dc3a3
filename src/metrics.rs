//! Consultation metrics — capability layer.
//!
//! Append-only records, one per resolved (provider, identifier). Sink
//! failures are logged and never escalate into the batch.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub provider: String,
    pub identifier: String,
    pub success: bool,
    pub duration_ms: u64,
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
}

impl MetricRecord {
    pub fn new(
        provider: impl Into<String>,
        identifier: impl Into<String>,
        success: bool,
        duration_ms: u64,
        cached: bool,
    ) -> Self {
        Self {
            provider: provider.into(),
            identifier: identifier.into(),
            success,
            duration_ms,
            cached,
            timestamp: Utc::now(),
        }
    }
}

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, record: MetricRecord) -> Result<()>;
}

/// One JSON line per record, appended to a single file.
pub struct JsonlMetricsSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlMetricsSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl MetricsSink for JsonlMetricsSink {
    async fn record(&self, record: MetricRecord) -> Result<()> {
        let line = serde_json::to_string(&record)?;
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        Ok(())
    }
}

/// Discards everything; used by tests and ad-hoc runs.
#[derive(Default)]
pub struct NullMetricsSink;

#[async_trait]
impl MetricsSink for NullMetricsSink {
    async fn record(&self, _record: MetricRecord) -> Result<()> {
        Ok(())
    }
}
