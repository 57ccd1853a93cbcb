use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::ChatMemberUpdated;
use tracing::{error, info};

use tg_relaybot::broadcast::BroadcastEngine;
use tg_relaybot::config;
use tg_relaybot::db::{self, SqliteStore};
use tg_relaybot::handlers::{self, AppState};
use tg_relaybot::telegram::TelegramTransport;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let bot = Bot::new(cfg.telegram.bot_token.clone());
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let engine = BroadcastEngine::new(
        store.clone(),
        Arc::new(TelegramTransport::new(bot.clone())),
        store,
        cfg.broadcast.engine_config(),
    );
    let state = Arc::new(AppState {
        pool,
        engine,
        owner_id: cfg.telegram.owner_id,
        links: cfg.links.clone(),
    });

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_my_chat_member().endpoint(on_my_chat_member));

    info!("starting telegram bot");
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn on_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if let Err(err) = handlers::handle_message(&bot, &state, &msg).await {
        error!(?err, "failed to handle message");
    }
    Ok(())
}

async fn on_my_chat_member(update: ChatMemberUpdated, state: Arc<AppState>) -> ResponseResult<()> {
    if let Err(err) = handlers::handle_my_chat_member(&state.pool, &update).await {
        error!(?err, chat_id = update.chat.id.0, "failed to track chat membership");
    }
    Ok(())
}
