use super::model::{BroadcastLog, ChatKind, ChatRecord, ChatStats};
use crate::broadcast::{BroadcastMode, DeliveryOutcome, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use sqlx::SqlitePool;
use tracing::instrument;
use uuid::Uuid;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized)
        .await
        .with_context(|| format!("failed to open database {normalized}"))?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// For file-backed SQLite URLs, expand a leading `~/` and create the parent
/// directory. Other schemes and in-memory URLs pass through unchanged.
fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Register a chat the bot was added to. A chat that had been left becomes
/// live again; its blocked flag is preserved.
#[instrument(skip_all)]
pub async fn upsert_chat(
    pool: &Pool,
    chat_id: i64,
    kind: ChatKind,
    title: Option<&str>,
    username: Option<&str>,
) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO chats (id, kind, title, username, blocked, joined_at, updated_at) \
         VALUES (?, ?, ?, ?, 0, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
            kind = excluded.kind, \
            title = excluded.title, \
            username = excluded.username, \
            updated_at = excluded.updated_at, \
            left_at = NULL",
    )
    .bind(chat_id)
    .bind(kind.as_str())
    .bind(title)
    .bind(username)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;
    Ok(())
}

/// Returns false when the chat is unknown.
#[instrument(skip_all)]
pub async fn mark_left(pool: &Pool, chat_id: i64) -> Result<bool> {
    let res = sqlx::query("UPDATE chats SET left_at = ?, updated_at = ? WHERE id = ?")
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(chat_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Returns false when the chat is unknown.
#[instrument(skip_all)]
pub async fn set_blocked(pool: &Pool, chat_id: i64, blocked: bool) -> Result<bool> {
    let res = sqlx::query("UPDATE chats SET blocked = ?, updated_at = ? WHERE id = ?")
        .bind(blocked)
        .bind(Utc::now())
        .bind(chat_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn get_chat(pool: &Pool, chat_id: i64) -> Result<Option<ChatRecord>> {
    let row = sqlx::query(
        "SELECT id, kind, title, username, blocked, left_at FROM chats WHERE id = ?",
    )
    .bind(chat_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(chat_from_row))
}

/// One page of chats the bot is still in, ordered by id, plus the total
/// count of such chats. Pages start at 1; page 0 is read as page 1.
#[instrument(skip_all)]
pub async fn list_live_chats(
    pool: &Pool,
    page: u32,
    page_size: u32,
) -> Result<(Vec<ChatRecord>, i64)> {
    let offset = i64::from(page.max(1) - 1) * i64::from(page_size);
    let rows = sqlx::query(
        "SELECT id, kind, title, username, blocked, left_at FROM chats \
         WHERE left_at IS NULL ORDER BY id LIMIT ? OFFSET ?",
    )
    .bind(i64::from(page_size))
    .bind(offset)
    .fetch_all(pool)
    .await?;
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chats WHERE left_at IS NULL")
        .fetch_one(pool)
        .await?;
    Ok((rows.iter().map(chat_from_row).collect(), total))
}

fn chat_from_row(row: &SqliteRow) -> ChatRecord {
    ChatRecord {
        id: row.get("id"),
        kind: ChatKind::parse_kind(row.get::<String, _>("kind").as_str()),
        title: row.get("title"),
        username: row.get("username"),
        blocked: row.get("blocked"),
        left_at: row.get("left_at"),
    }
}

/// Ids of every chat that should receive a broadcast, in id order.
#[instrument(skip_all)]
pub async fn eligible_chat_ids(pool: &Pool) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM chats WHERE left_at IS NULL AND blocked = 0 ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

#[instrument(skip_all)]
pub async fn chat_stats(pool: &Pool) -> Result<ChatStats> {
    let row = sqlx::query(
        "SELECT \
            COUNT(*) AS total, \
            COALESCE(SUM(kind IN ('group', 'supergroup')), 0) AS groups, \
            COALESCE(SUM(kind = 'channel'), 0) AS channels, \
            COALESCE(SUM(blocked != 0), 0) AS blocked \
         FROM chats WHERE left_at IS NULL",
    )
    .fetch_one(pool)
    .await?;
    Ok(ChatStats {
        total: row.get("total"),
        groups: row.get("groups"),
        channels: row.get("channels"),
        blocked: row.get("blocked"),
    })
}

/// Returns false if the user was already an admin.
#[instrument(skip_all)]
pub async fn add_admin(pool: &Pool, user_id: i64) -> Result<bool> {
    let res = sqlx::query("INSERT OR IGNORE INTO admins (user_id) VALUES (?)")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Returns false if the user was not an admin.
#[instrument(skip_all)]
pub async fn remove_admin(pool: &Pool, user_id: i64) -> Result<bool> {
    let res = sqlx::query("DELETE FROM admins WHERE user_id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

#[instrument(skip_all)]
pub async fn is_admin(pool: &Pool, user_id: i64) -> Result<bool> {
    let found = sqlx::query_scalar::<_, i64>("SELECT user_id FROM admins WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

#[instrument(skip_all)]
pub async fn list_admins(pool: &Pool) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT user_id FROM admins ORDER BY user_id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

/// Append a run summary to the audit log. Rows are never updated.
#[instrument(skip_all)]
pub async fn insert_broadcast_log(pool: &Pool, summary: &RunSummary) -> Result<i64> {
    let details = serde_json::to_string(&summary.recent_outcomes)
        .context("failed to encode broadcast details")?;
    let rec = sqlx::query(
        "INSERT INTO broadcast_logs (run_id, mode, started_at, finished_at, success, failed, details) \
         VALUES (?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(summary.run_id.to_string())
    .bind(summary.mode.as_str())
    .bind(summary.started_at)
    .bind(summary.finished_at)
    .bind(summary.success_count as i64)
    .bind(summary.failure_count as i64)
    .bind(details)
    .fetch_one(pool)
    .await?;
    Ok(rec.get("id"))
}

#[instrument(skip_all)]
pub async fn last_broadcast_log(pool: &Pool) -> Result<Option<BroadcastLog>> {
    let row = sqlx::query(
        "SELECT id, run_id, mode, started_at, finished_at, success, failed, details \
         FROM broadcast_logs ORDER BY started_at DESC, id DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    row.map(|row| broadcast_log_from_row(&row)).transpose()
}

fn broadcast_log_from_row(row: &SqliteRow) -> Result<BroadcastLog> {
    let run_id: String = row.get("run_id");
    let mode: String = row.get("mode");
    let details: String = row.get("details");
    let started_at: DateTime<Utc> = row.get("started_at");
    let finished_at: DateTime<Utc> = row.get("finished_at");
    Ok(BroadcastLog {
        id: row.get("id"),
        run_id: Uuid::parse_str(&run_id).context("invalid run_id in broadcast_logs")?,
        mode: BroadcastMode::parse_mode(&mode),
        started_at,
        finished_at,
        success: row.get("success"),
        failed: row.get("failed"),
        details: serde_json::from_str::<Vec<DeliveryOutcome>>(&details)
            .context("invalid details in broadcast_logs")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_pool() -> Pool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    #[test]
    fn sqlite_url_normalization() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
        let td = tempfile::tempdir().unwrap();
        let file = td.path().join("nested/relay.db");
        let url = format!("sqlite:{}?mode=rwc", file.display());
        assert_eq!(
            prepare_sqlite_url(&url),
            format!("sqlite://{}?mode=rwc", file.display())
        );
        assert!(td.path().join("nested").exists());
    }

    #[tokio::test]
    async fn registry_eligibility_flow() {
        let pool = setup_pool().await;
        upsert_chat(&pool, -100, ChatKind::Supergroup, Some("Group A"), None)
            .await
            .unwrap();
        upsert_chat(&pool, -200, ChatKind::Channel, Some("News"), Some("news"))
            .await
            .unwrap();
        upsert_chat(&pool, 300, ChatKind::Private, None, Some("alice"))
            .await
            .unwrap();
        assert_eq!(eligible_chat_ids(&pool).await.unwrap(), vec![-200, -100, 300]);

        assert!(set_blocked(&pool, -100, true).await.unwrap());
        assert!(mark_left(&pool, 300).await.unwrap());
        assert!(!mark_left(&pool, 999).await.unwrap());
        assert_eq!(eligible_chat_ids(&pool).await.unwrap(), vec![-200]);

        let stats = chat_stats(&pool).await.unwrap();
        assert_eq!(
            stats,
            ChatStats {
                total: 2,
                groups: 1,
                channels: 1,
                blocked: 1
            }
        );

        // Re-adding the bot revives the chat but keeps the block.
        upsert_chat(&pool, 300, ChatKind::Private, None, Some("alice"))
            .await
            .unwrap();
        upsert_chat(&pool, -100, ChatKind::Supergroup, Some("Group A2"), None)
            .await
            .unwrap();
        let chat = get_chat(&pool, -100).await.unwrap().unwrap();
        assert!(chat.blocked);
        assert_eq!(chat.title.as_deref(), Some("Group A2"));
        assert_eq!(eligible_chat_ids(&pool).await.unwrap(), vec![-200, 300]);
    }

    #[tokio::test]
    async fn live_chat_pages() {
        let pool = setup_pool().await;
        let (chats, total) = list_live_chats(&pool, 1, 10).await.unwrap();
        assert!(chats.is_empty());
        assert_eq!(total, 0);

        for id in 1..=23i64 {
            upsert_chat(&pool, -id, ChatKind::Group, Some("g"), None)
                .await
                .unwrap();
        }
        mark_left(&pool, -1).await.unwrap();
        set_blocked(&pool, -2, true).await.unwrap();

        // 22 live chats (blocked ones are still listed), ids -23..=-2.
        let (first, total) = list_live_chats(&pool, 1, 10).await.unwrap();
        assert_eq!(total, 22);
        let ids: Vec<i64> = first.iter().map(|c| c.id).collect();
        assert_eq!(ids, (-23..=-14).collect::<Vec<_>>());
        assert_eq!(list_live_chats(&pool, 0, 10).await.unwrap().0, first);

        let (last, _) = list_live_chats(&pool, 3, 10).await.unwrap();
        let ids: Vec<i64> = last.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![-3, -2]);
        assert!(last[1].blocked);

        let (past_end, total) = list_live_chats(&pool, 4, 10).await.unwrap();
        assert!(past_end.is_empty());
        assert_eq!(total, 22);
    }

    #[tokio::test]
    async fn admins_roundtrip() {
        let pool = setup_pool().await;
        assert!(add_admin(&pool, 42).await.unwrap());
        assert!(!add_admin(&pool, 42).await.unwrap());
        assert!(add_admin(&pool, 7).await.unwrap());
        assert!(is_admin(&pool, 42).await.unwrap());
        assert_eq!(list_admins(&pool).await.unwrap(), vec![7, 42]);
        assert!(remove_admin(&pool, 42).await.unwrap());
        assert!(!remove_admin(&pool, 42).await.unwrap());
        assert!(!is_admin(&pool, 42).await.unwrap());
    }

    #[tokio::test]
    async fn broadcast_log_is_readable() {
        let pool = setup_pool().await;
        assert!(last_broadcast_log(&pool).await.unwrap().is_none());

        let summary = RunSummary {
            run_id: Uuid::new_v4(),
            mode: BroadcastMode::Copy,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            success_count: 3,
            failure_count: 1,
            recent_outcomes: vec![
                DeliveryOutcome::delivered(1),
                DeliveryOutcome::failed(2, "Forbidden: bot was blocked by the user"),
            ],
        };
        let id = insert_broadcast_log(&pool, &summary).await.unwrap();
        let log = last_broadcast_log(&pool).await.unwrap().unwrap();
        assert_eq!(log.id, id);
        assert_eq!(log.run_id, summary.run_id);
        assert_eq!(log.mode, Some(BroadcastMode::Copy));
        assert_eq!((log.success, log.failed), (3, 1));
        assert_eq!(log.details, summary.recent_outcomes);
    }
}
