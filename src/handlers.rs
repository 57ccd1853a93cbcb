use crate::broadcast::{BroadcastEngine, BroadcastError, DeliveryOperation, MessageRef, RunSummary};
use crate::config::Links;
use crate::db::{self, BroadcastLog, ChatKind, ChatRecord, ChatStats, Pool};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use teloxide::prelude::*;
use teloxide::types::{Chat, ChatMemberUpdated};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

/// Chats shown per `/list` page.
pub const CHAT_PAGE_SIZE: u32 = 10;

static COMMAND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/([A-Za-z_]+)(?:@\w+)?(?:\s+([\s\S]*))?$").expect("valid regex"));

/// Everything a command needs besides the bot handle.
#[derive(Clone)]
pub struct AppState {
    pub pool: Pool,
    pub engine: BroadcastEngine,
    pub owner_id: i64,
    pub links: Links,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Ping,
    /// Text to send; `None` when the command only replies to a message.
    Broadcast(Option<String>),
    Stats,
    /// Page number, 1-based; `None` means the first page.
    List(Option<u32>),
    // Chat id arguments are `None` when missing or not a number.
    Block(Option<i64>),
    Unblock(Option<i64>),
    Leave(Option<i64>),
    AddAdmin(Option<i64>),
    DelAdmin(Option<i64>),
    Admins,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    User,
    Admin,
    Owner,
}

impl Command {
    fn required_role(&self) -> Role {
        match self {
            Command::Start | Command::Help | Command::Ping | Command::Unknown => Role::User,
            Command::Broadcast(_) | Command::Stats => Role::Admin,
            Command::Block(_)
            | Command::Unblock(_)
            | Command::Leave(_)
            | Command::AddAdmin(_)
            | Command::DelAdmin(_)
            | Command::Admins
            | Command::List(_) => Role::Owner,
        }
    }
}

impl Role {
    pub fn allows(&self, command: &Command) -> bool {
        *self >= command.required_role()
    }
}

/// Parse `/name[@bot] [args]`. Returns `None` for anything that is not a command.
pub fn parse_command(text: &str) -> Option<Command> {
    let caps = COMMAND_RE.captures(text.trim())?;
    let name = caps.get(1)?.as_str().to_ascii_lowercase();
    let args = caps
        .get(2)
        .map(|m| m.as_str().trim())
        .filter(|s| !s.is_empty());
    let id_arg = || args.and_then(|a| a.split_whitespace().next()?.parse::<i64>().ok());

    let cmd = match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "ping" => Command::Ping,
        "broadcast" => Command::Broadcast(args.map(str::to_owned)),
        "stats" => Command::Stats,
        "block" => Command::Block(id_arg()),
        "unblock" => Command::Unblock(id_arg()),
        "leave" => Command::Leave(id_arg()),
        "addadmin" => Command::AddAdmin(id_arg()),
        "deladmin" => Command::DelAdmin(id_arg()),
        "admins" => Command::Admins,
        "list" => Command::List(args.and_then(|a| a.split_whitespace().next()?.parse().ok())),
        _ => Command::Unknown,
    };
    Some(cmd)
}

pub async fn resolve_role(pool: &Pool, owner_id: i64, user_id: i64) -> Result<Role> {
    if user_id == owner_id {
        return Ok(Role::Owner);
    }
    if db::is_admin(pool, user_id).await? {
        return Ok(Role::Admin);
    }
    Ok(Role::User)
}

#[instrument(skip_all)]
pub async fn handle_message(bot: &Bot, state: &AppState, msg: &Message) -> Result<()> {
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let Some(command) = msg.text().and_then(parse_command) else {
        return Ok(());
    };
    let role = resolve_role(&state.pool, state.owner_id, user.id.0 as i64).await?;
    if !role.allows(&command) {
        return Ok(());
    }

    let chat_id = msg.chat.id;
    match command {
        Command::Start => {
            let _ = bot.send_message(chat_id, start_text(role, &state.links)).await;
        }
        Command::Help => {
            let _ = bot.send_message(chat_id, help_text(role)).await;
        }
        Command::Ping => {
            let _ = bot.send_message(chat_id, "PONG").await;
        }
        Command::Broadcast(text) => {
            let operation = match (msg.reply_to_message(), text) {
                (Some(source), _) => DeliveryOperation::CopyMessage(MessageRef {
                    from_chat: source.chat.id.0,
                    message_id: source.id.0,
                }),
                (None, Some(text)) => DeliveryOperation::SendText(text),
                (None, None) => {
                    let _ = bot
                        .send_message(
                            chat_id,
                            "Usage:\n- Reply to a message with /broadcast\n- Or: /broadcast Your message text",
                        )
                        .await;
                    return Ok(());
                }
            };
            let _ = bot
                .send_message(chat_id, format!("Broadcasting {}…", operation.mode().as_str()))
                .await;
            info!(user_id = user.id.0, mode = operation.mode().as_str(), "broadcast requested");
            let bot = bot.clone();
            spawn_broadcast(state.engine.clone(), operation, move |report| async move {
                let _ = bot.send_message(chat_id, report).await;
            });
        }
        Command::Stats => {
            let stats = db::chat_stats(&state.pool).await?;
            let last = db::last_broadcast_log(&state.pool).await?;
            let _ = bot
                .send_message(chat_id, format_stats(&stats, last.as_ref()))
                .await;
        }
        Command::List(page) => {
            let page = page.unwrap_or(1).max(1);
            let (chats, total) = db::list_live_chats(&state.pool, page, CHAT_PAGE_SIZE).await?;
            let _ = bot
                .send_message(chat_id, format_chat_page(&chats, page, total, CHAT_PAGE_SIZE))
                .await;
        }
        Command::Block(id) => set_block_flag(bot, state, chat_id, id, true).await?,
        Command::Unblock(id) => set_block_flag(bot, state, chat_id, id, false).await?,
        Command::Leave(id) => {
            let Some(target_id) = id else {
                let _ = bot.send_message(chat_id, "Usage: /leave <chat_id>").await;
                return Ok(());
            };
            let reply = match bot.leave_chat(ChatId(target_id)).await {
                Ok(_) => {
                    db::mark_left(&state.pool, target_id).await?;
                    format!("Left chat {}", target_id)
                }
                Err(err) => {
                    warn!(?err, target_id, "failed to leave chat");
                    format!("Error leaving chat: {}", err)
                }
            };
            let _ = bot.send_message(chat_id, reply).await;
        }
        Command::AddAdmin(id) => {
            let Some(target) = id else {
                let _ = bot.send_message(chat_id, "Usage: /addadmin <user_id>").await;
                return Ok(());
            };
            let reply = if db::add_admin(&state.pool, target).await? {
                format!("Added admin {}", target)
            } else {
                format!("{} is already an admin", target)
            };
            let _ = bot.send_message(chat_id, reply).await;
        }
        Command::DelAdmin(id) => {
            let Some(target) = id else {
                let _ = bot.send_message(chat_id, "Usage: /deladmin <user_id>").await;
                return Ok(());
            };
            let reply = if db::remove_admin(&state.pool, target).await? {
                format!("Removed admin {}", target)
            } else {
                format!("{} is not an admin", target)
            };
            let _ = bot.send_message(chat_id, reply).await;
        }
        Command::Admins => {
            let admins = db::list_admins(&state.pool).await?;
            let reply = if admins.is_empty() {
                "No admins.".to_string()
            } else {
                let lines: Vec<String> = admins.iter().map(|a| format!("- {}", a)).collect();
                format!("Admins:\n{}", lines.join("\n"))
            };
            let _ = bot.send_message(chat_id, reply).await;
        }
        Command::Unknown => {}
    }
    Ok(())
}

/// Run a broadcast in the background and hand the final report to `report`.
/// The invoking chat keeps getting replies while the run is in progress.
pub fn spawn_broadcast<F, Fut>(
    engine: BroadcastEngine,
    operation: DeliveryOperation,
    report: F,
) -> JoinHandle<()>
where
    F: FnOnce(String) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let result = engine.run(operation).await;
        report(broadcast_report(&result)).await;
    })
}

async fn set_block_flag(
    bot: &Bot,
    state: &AppState,
    chat_id: ChatId,
    id: Option<i64>,
    blocked: bool,
) -> Result<()> {
    let Some(target_id) = id else {
        let name = if blocked { "block" } else { "unblock" };
        let _ = bot
            .send_message(chat_id, format!("Usage: /{} <chat_id>", name))
            .await;
        return Ok(());
    };
    let reply = if db::set_blocked(&state.pool, target_id, blocked).await? {
        info!(target_id, blocked, "chat block flag changed");
        format!("{} chat {}", if blocked { "Blocked" } else { "Unblocked" }, target_id)
    } else {
        format!("Unknown chat {}", target_id)
    };
    let _ = bot.send_message(chat_id, reply).await;
    Ok(())
}

/// Keep the chat registry in sync with the bot's own membership.
#[instrument(skip_all)]
pub async fn handle_my_chat_member(pool: &Pool, update: &ChatMemberUpdated) -> Result<()> {
    let chat = &update.chat;
    let kind = &update.new_chat_member.kind;
    if kind.is_owner() || kind.is_administrator() || kind.is_member() {
        let title = chat.title().or_else(|| chat.username());
        db::upsert_chat(pool, chat.id.0, chat_kind(chat), title, chat.username()).await?;
        info!(chat_id = chat.id.0, "registered chat");
    } else if kind.is_left() || kind.is_banned() {
        db::mark_left(pool, chat.id.0).await?;
        info!(chat_id = chat.id.0, "bot removed from chat");
    }
    Ok(())
}

fn chat_kind(chat: &Chat) -> ChatKind {
    if chat.is_channel() {
        ChatKind::Channel
    } else if chat.is_supergroup() {
        ChatKind::Supergroup
    } else if chat.is_group() {
        ChatKind::Group
    } else {
        ChatKind::Private
    }
}

/// Text shown to the invoker once a run is over.
pub fn broadcast_report(result: &Result<RunSummary, BroadcastError>) -> String {
    match result {
        Ok(summary) => format!(
            "Done. Sent: {}, Failed: {}",
            summary.success_count, summary.failure_count
        ),
        Err(BroadcastError::Persistence { summary, source }) => {
            warn!(error = %source, "broadcast audit record missing");
            format!(
                "Done. Sent: {}, Failed: {}\nWarning: the audit log for this broadcast was not recorded.",
                summary.success_count, summary.failure_count
            )
        }
        Err(BroadcastError::Enumeration(_)) => {
            "Broadcast aborted: could not load the chat list. Nothing was sent.".to_string()
        }
    }
}

/// One `/list` page: a "page X/Y" header and a line per chat.
pub fn format_chat_page(chats: &[ChatRecord], page: u32, total: i64, page_size: u32) -> String {
    if chats.is_empty() {
        return "No chats.".to_string();
    }
    let size = i64::from(page_size.max(1));
    let pages = ((total + size - 1) / size).max(1);
    let mut lines = vec![format!("Chats (page {}/{})", page, pages), String::new()];
    for chat in chats {
        let title = chat
            .title
            .as_deref()
            .or(chat.username.as_deref())
            .map(str::to_owned)
            .unwrap_or_else(|| chat.id.to_string());
        lines.push(format!(
            "{} {} • {} • {}",
            if chat.blocked { "🚫" } else { "✅" },
            chat.id,
            chat.kind.map(|k| k.as_str()).unwrap_or("?"),
            title
        ));
    }
    lines.join("\n")
}

pub fn format_stats(stats: &ChatStats, last: Option<&BroadcastLog>) -> String {
    let mut lines = vec![
        "Stats".to_string(),
        format!(
            "Total chats: {} (groups: {}, channels: {})",
            stats.total, stats.groups, stats.channels
        ),
        format!("Blocked: {}", stats.blocked),
    ];
    if let Some(log) = last {
        lines.push(String::new());
        lines.push("Last broadcast".to_string());
        lines.push(format!("At: {}", log.started_at.format("%Y-%m-%d %H:%M:%S UTC")));
        lines.push(format!(
            "Mode: {}",
            log.mode.map(|m| m.as_str()).unwrap_or("?")
        ));
        lines.push(format!("Success: {}", log.success));
        lines.push(format!("Failed: {}", log.failed));
    }
    lines.join("\n")
}

fn start_text(role: Role, links: &Links) -> String {
    match role {
        Role::Owner | Role::Admin => {
            "Welcome back. Use /broadcast to reach every chat and /stats for numbers. See /help."
                .to_string()
        }
        Role::User => {
            let mut text = String::from("Hi! Add me to your group or channel to receive updates.");
            if let Some(url) = &links.support_url {
                text.push_str(&format!("\nSupport: {}", url));
            }
            if let Some(url) = &links.promo_url {
                text.push_str(&format!("\nPromotions: {}", url));
            }
            text
        }
    }
}

fn help_text(role: Role) -> &'static str {
    match role {
        Role::Owner => concat!(
            "Owner commands\n",
            "/broadcast - reply to a message, or /broadcast <text>\n",
            "/stats - chat and broadcast stats\n",
            "/list [page] - list chats, 10 per page\n",
            "/block <chat_id> - exclude a chat from broadcasts\n",
            "/unblock <chat_id> - include a chat again\n",
            "/leave <chat_id> - leave a chat\n",
            "/addadmin <user_id> - add admin\n",
            "/deladmin <user_id> - remove admin\n",
            "/admins - list admins\n",
            "/ping - health check",
        ),
        Role::Admin => concat!(
            "Admin commands\n",
            "/broadcast - reply to a message, or /broadcast <text>\n",
            "/stats - chat and broadcast stats\n",
            "/ping - health check",
        ),
        Role::User => "/start - about this bot\n/ping - health check",
    }
}
