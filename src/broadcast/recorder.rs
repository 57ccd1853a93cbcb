use anyhow::Result;
use async_trait::async_trait;

use super::model::RunSummary;

/// Append-only audit sink for finished runs.
#[async_trait]
pub trait RunRecorder: Send + Sync {
    /// Store one summary and return the id of the new record.
    async fn persist(&self, summary: &RunSummary) -> Result<i64>;
}
