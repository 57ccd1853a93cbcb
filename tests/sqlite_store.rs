use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tg_relaybot::broadcast::{
    BroadcastEngine, BroadcastError, BroadcastMode, DeliveryOperation, DeliveryTransport,
    DestinationSource, EngineConfig,
};
use tg_relaybot::db::{self, ChatKind, SqliteStore};
use tokio::sync::Mutex;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Fails for chats whose id ends in 9, mimicking "chat not found".
#[derive(Default)]
struct FlakyTransport {
    delivered: Mutex<Vec<i64>>,
}

#[async_trait]
impl DeliveryTransport for FlakyTransport {
    async fn deliver(&self, chat_id: i64, _operation: &DeliveryOperation) -> Result<()> {
        if chat_id.abs() % 10 == 9 {
            return Err(anyhow!("Bad Request: chat not found"));
        }
        self.delivered.lock().await.push(chat_id);
        Ok(())
    }
}

async fn seed_registry(pool: &sqlx::SqlitePool) {
    for id in 1..=20i64 {
        db::upsert_chat(pool, -id, ChatKind::Supergroup, Some("group"), None)
            .await
            .unwrap();
    }
    db::set_blocked(pool, -3, true).await.unwrap();
    db::mark_left(pool, -4).await.unwrap();
}

#[tokio::test]
async fn store_enumerates_only_eligible_chats() {
    let pool = setup_pool().await;
    seed_registry(&pool).await;
    let store = SqliteStore::new(pool);

    let ids: Vec<i64> = store.enumerate().await.unwrap().collect();

    assert_eq!(ids.len(), 18);
    assert!(!ids.contains(&-3));
    assert!(!ids.contains(&-4));
}

#[tokio::test]
async fn run_is_recorded_in_broadcast_logs() {
    let pool = setup_pool().await;
    seed_registry(&pool).await;
    let store = Arc::new(SqliteStore::new(pool.clone()));
    let transport = Arc::new(FlakyTransport::default());
    let engine = BroadcastEngine::new(
        store.clone(),
        transport.clone(),
        store,
        EngineConfig::default(),
    );

    let summary = engine
        .run(DeliveryOperation::SendText("hello groups".into()))
        .await
        .unwrap();

    // -9 and -19 fail; -3 blocked and -4 left are never attempted.
    assert_eq!(summary.success_count, 16);
    assert_eq!(summary.failure_count, 2);
    assert_eq!(transport.delivered.lock().await.len(), 16);

    let log = db::last_broadcast_log(&pool).await.unwrap().unwrap();
    assert_eq!(log.run_id, summary.run_id);
    assert_eq!(log.mode, Some(BroadcastMode::Text));
    assert_eq!((log.success, log.failed), (16, 2));
    assert_eq!(log.details.len(), 18);
    let failed: Vec<i64> = log
        .details
        .iter()
        .filter(|o| !o.ok)
        .map(|o| o.chat_id)
        .collect();
    assert_eq!(failed.len(), 2);
    assert!(failed.contains(&-9) && failed.contains(&-19));

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM broadcast_logs")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn audit_write_failure_is_reported_separately() {
    let pool = setup_pool().await;
    seed_registry(&pool).await;
    sqlx::query("DROP TABLE broadcast_logs")
        .execute(&pool)
        .await
        .unwrap();
    let store = Arc::new(SqliteStore::new(pool));
    let transport = Arc::new(FlakyTransport::default());
    let engine = BroadcastEngine::new(
        store.clone(),
        transport.clone(),
        store,
        EngineConfig::default(),
    );

    let err = engine
        .run(DeliveryOperation::SendText("hello".into()))
        .await
        .unwrap_err();

    assert!(matches!(err, BroadcastError::Persistence { .. }));
    let summary = err.summary().unwrap();
    assert_eq!((summary.success_count, summary.failure_count), (16, 2));
    assert_eq!(transport.delivered.lock().await.len(), 16);
}
