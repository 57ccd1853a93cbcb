use anyhow::Result;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::MessageId;

use crate::broadcast::{DeliveryOperation, DeliveryTransport};

/// Delivers broadcasts through the Telegram Bot API.
#[derive(Debug, Clone)]
pub struct TelegramTransport {
    bot: Bot,
}

impl TelegramTransport {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

#[async_trait]
impl DeliveryTransport for TelegramTransport {
    async fn deliver(&self, chat_id: i64, operation: &DeliveryOperation) -> Result<()> {
        match operation {
            DeliveryOperation::SendText(body) => {
                self.bot
                    .send_message(ChatId(chat_id), body.as_str())
                    .disable_web_page_preview(true)
                    .await?;
            }
            DeliveryOperation::CopyMessage(source) => {
                self.bot
                    .copy_message(
                        ChatId(chat_id),
                        ChatId(source.from_chat),
                        MessageId(source.message_id),
                    )
                    .await?;
            }
        }
        Ok(())
    }
}
