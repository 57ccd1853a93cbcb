use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::Bot;
use tracing::{error, info};

use tg_relaybot::broadcast::{
    BroadcastEngine, BroadcastError, DeliveryOperation, DestinationSource, MessageRef,
};
use tg_relaybot::config;
use tg_relaybot::db::{self, SqliteStore};
use tg_relaybot::telegram::TelegramTransport;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Run a single broadcast to every registered chat and exit"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Text to send to every chat
    #[arg(long, conflicts_with = "copy_from")]
    text: Option<String>,

    /// Chat id holding the message to copy
    #[arg(long, requires = "message_id", allow_negative_numbers = true)]
    copy_from: Option<i64>,

    /// Id of the message to copy (with --copy-from)
    #[arg(long, requires = "copy_from")]
    message_id: Option<i32>,

    /// Only print the chats that would receive the broadcast
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    fn operation(&self) -> Result<DeliveryOperation> {
        match (&self.text, self.copy_from, self.message_id) {
            (Some(text), None, None) if !text.trim().is_empty() => {
                Ok(DeliveryOperation::SendText(text.clone()))
            }
            (None, Some(from_chat), Some(message_id)) => {
                Ok(DeliveryOperation::CopyMessage(MessageRef {
                    from_chat,
                    message_id,
                }))
            }
            _ => bail!("pass either --text or --copy-from with --message-id"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let operation = args.operation()?;
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;
    let store = Arc::new(SqliteStore::new(pool));

    if args.dry_run {
        let ids: Vec<i64> = store.enumerate().await?.collect();
        info!(count = ids.len(), mode = operation.mode().as_str(), "dry run");
        for id in ids {
            println!("{}", id);
        }
        return Ok(());
    }

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let engine = BroadcastEngine::new(
        store.clone(),
        Arc::new(TelegramTransport::new(bot)),
        store,
        cfg.broadcast.engine_config(),
    );

    match engine.run(operation).await {
        Ok(summary) => {
            println!(
                "run {}: sent {}, failed {}",
                summary.run_id, summary.success_count, summary.failure_count
            );
            Ok(())
        }
        Err(err @ BroadcastError::Persistence { .. }) => {
            if let Some(summary) = err.summary() {
                println!(
                    "run {}: sent {}, failed {} (not recorded)",
                    summary.run_id, summary.success_count, summary.failure_count
                );
            }
            error!(%err, "audit record not stored");
            Err(err.into())
        }
        Err(err) => Err(err.into()),
    }
}
