use anyhow::Result;
use async_trait::async_trait;

use super::repo::{self, Pool};
use crate::broadcast::{DestinationSource, RunRecorder, RunSummary, Snapshot};

/// SQLite-backed chat registry and audit log for the broadcast engine.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DestinationSource for SqliteStore {
    async fn enumerate(&self) -> Result<Snapshot> {
        Ok(Snapshot::new(repo::eligible_chat_ids(&self.pool).await?))
    }
}

#[async_trait]
impl RunRecorder for SqliteStore {
    async fn persist(&self, summary: &RunSummary) -> Result<i64> {
        repo::insert_broadcast_log(&self.pool, summary).await
    }
}
