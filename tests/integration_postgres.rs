//! PostgreSQL Integration Tests
//!
//! Needs a reachable server; connection settings come from the standard
//! PG* variables. Source queue and audit log live in the same database.
//!
//! Run with: cargo test --features integration_tests --test integration_postgres

#![cfg(feature = "integration_tests")]

use std::sync::{Arc, OnceLock};

use chrono::{Duration, Utc};
use tokio::sync::{Mutex, MutexGuard};

use ddl_relay::config::StoreConfig;
use ddl_relay::domain::CapturedChange;
use ddl_relay::notify::LogNotifier;
use ddl_relay::pool::PoolManager;
use ddl_relay::relay::{fetch_batch, FetchCriteria, RelayWorker};
use ddl_relay::store::{Connector, PgConnector, PgStore, StorePool, StoreRole};

mod common;

const MIGRATIONS: &[&str] = &[
    include_str!("../migrations/001_local_ddl_audit.sql"),
    include_str!("../migrations/002_schema_audit_log.sql"),
];

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn store_config(name: &str) -> StoreConfig {
    dotenvy::dotenv().ok();
    StoreConfig::new(name, &env_or("PGHOST", "localhost"), &env_or("PGDATABASE", "ddl_relay_test"))
        .with_port(env_or("PGPORT", "5432").parse().unwrap())
        .with_credentials(&env_or("PGUSER", "postgres"), &env_or("PGPASSWORD", "postgres"))
}

/// Tests share tables; hold this for the whole test
async fn serial() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(())).lock().await
}

/// Create both tables and empty them
async fn setup_test_db(store: &PgStore) {
    for migration in MIGRATIONS {
        for statement in migration.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement)
                .execute(store.pool())
                .await
                .expect("Failed to apply migration");
        }
    }

    sqlx::query("TRUNCATE TABLE local_ddl_audit, schema_audit_log RESTART IDENTITY")
        .execute(store.pool())
        .await
        .expect("Failed to clean up DB");
}

#[tokio::test]
async fn test_schema_check() {
    let _guard = serial().await;
    let store = PgConnector.connect(&store_config("sales")).await.unwrap();
    setup_test_db(&store).await;

    assert!(store.is_connected().await);
    assert!(store.check_schema(StoreRole::Source).await.unwrap());
    assert!(store.check_schema(StoreRole::Central).await.unwrap());
}

#[tokio::test]
async fn test_fetch_filters_and_orders() {
    let _guard = serial().await;
    let store = PgConnector.connect(&store_config("sales")).await.unwrap();
    setup_test_db(&store).await;

    let t0 = Utc::now();
    let second = store
        .insert_captured(&CapturedChange::new("CREATE_TABLE", "TABLE", "second"))
        .await
        .unwrap();
    let first = store
        .insert_captured(&CapturedChange::new("CREATE_TABLE", "TABLE", "first"))
        .await
        .unwrap();
    let self_test = store
        .insert_captured(&CapturedChange::new("CREATE_TABLE", "TABLE", "temp_test_trigger_1"))
        .await
        .unwrap();
    let lookalike = store
        .insert_captured(&CapturedChange::new("CREATE_TABLE", "TABLE", "tempXtestXtriggerX1"))
        .await
        .unwrap();

    // Pin capture times: first < second = lookalike
    for (id, at) in [
        (first, t0 - Duration::seconds(10)),
        (second, t0),
        (lookalike, t0),
        (self_test, t0 - Duration::seconds(20)),
    ] {
        sqlx::query("UPDATE local_ddl_audit SET created_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(store.pool())
            .await
            .unwrap();
    }

    let batch = fetch_batch(&store, &FetchCriteria::new(50, 3)).await.unwrap();
    let ids: Vec<i64> = batch.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![first, second, lookalike]);

    let batch = fetch_batch(&store, &FetchCriteria::new(1, 3)).await.unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].id, first);
}

#[tokio::test]
async fn test_retry_bookkeeping() {
    let _guard = serial().await;
    let store = PgConnector.connect(&store_config("sales")).await.unwrap();
    setup_test_db(&store).await;

    let id = store
        .insert_captured(&CapturedChange::new("DROP_VIEW", "VIEW", "v_orders"))
        .await
        .unwrap();
    sqlx::query("UPDATE local_ddl_audit SET retry_count = NULL WHERE id = $1")
        .bind(id)
        .execute(store.pool())
        .await
        .unwrap();

    let criteria = FetchCriteria::new(50, 3);
    for _ in 0..3 {
        assert_eq!(fetch_batch(&store, &criteria).await.unwrap().len(), 1);
        store.record_failure(id, "central write failed").await.unwrap();
    }
    assert!(fetch_batch(&store, &criteria).await.unwrap().is_empty());

    let (retry_count, processed): (Option<i32>, bool) =
        sqlx::query_as("SELECT retry_count, processed FROM local_ddl_audit WHERE id = $1")
            .bind(id)
            .fetch_one(store.pool())
            .await
            .unwrap();
    assert_eq!(retry_count, Some(3));
    assert!(!processed);

    assert!(store.mark_processed(999_999, Utc::now()).await.is_err());
}

#[tokio::test]
async fn test_worker_cycle_end_to_end() {
    let _guard = serial().await;
    let store = PgConnector.connect(&store_config("sales")).await.unwrap();
    setup_test_db(&store).await;

    for name in ["T1", "T2", "T3"] {
        store
            .insert_captured(
                &CapturedChange::new("CREATE_TABLE", "TABLE", name)
                    .with_schema("public")
                    .with_principal("postgres", "postgres", "localhost"),
            )
            .await
            .unwrap();
    }

    let mut worker = RelayWorker::new(
        PoolManager::new(PgConnector),
        store_config("audit"),
        vec![store_config("sales")],
        common::settings(),
        Arc::new(LogNotifier),
    );
    worker.validate_stores().await.unwrap();

    let report = worker.poll_all().await;
    assert_eq!(report.total_relayed(), 3);

    let relayed: Vec<(String, bool)> =
        sqlx::query_as("SELECT object_name, notified FROM schema_audit_log ORDER BY id")
            .fetch_all(store.pool())
            .await
            .unwrap();
    assert_eq!(
        relayed,
        vec![
            ("T1".to_string(), true),
            ("T2".to_string(), true),
            ("T3".to_string(), true),
        ]
    );

    let carried: Vec<(i32, Option<String>)> =
        sqlx::query_as("SELECT retry_count, error_message FROM schema_audit_log ORDER BY id")
            .fetch_all(store.pool())
            .await
            .unwrap();
    assert_eq!(carried, vec![(0, None), (0, None), (0, None)]);

    let pending: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM local_ddl_audit WHERE processed = FALSE OR retry_count <> 0",
    )
    .fetch_one(store.pool())
    .await
    .unwrap();
    assert_eq!(pending, 0);

    let report = worker.close_all().await;
    assert_eq!(report.closed, 2);
    assert!(report.failures.is_empty());
}
