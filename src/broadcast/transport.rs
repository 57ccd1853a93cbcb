use anyhow::Result;
use async_trait::async_trait;

use super::model::DeliveryOperation;

/// Sends one payload to one chat on the messaging platform.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn deliver(&self, chat_id: i64, operation: &DeliveryOperation) -> Result<()>;
}
