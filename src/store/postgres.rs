//! PostgreSQL store backend
//!
//! Maps `local_ddl_audit` and `schema_audit_log` rows to typed records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{PgPool, Row};

use super::{Connector, StoreError, StorePool, StoreRole};
use crate::config::StoreConfig;
use crate::db;
use crate::domain::{CapturedChange, ChangeEvent, RelayedEvent};
use crate::relay::FetchCriteria;

const APPLICATION_NAME: &str = "ddl_relay";

/// Connection options for a store: credentials, TLS and request timeout
pub fn connect_options(config: &StoreConfig) -> PgConnectOptions {
    let ssl_mode = if config.trust_server_certificate {
        PgSslMode::Prefer
    } else {
        PgSslMode::VerifyFull
    };

    PgConnectOptions::new()
        .host(&config.server)
        .port(config.port)
        .database(&config.database)
        .username(&config.username)
        .password(&config.password)
        .ssl_mode(ssl_mode)
        .application_name(APPLICATION_NAME)
        .options([("statement_timeout", config.request_timeout.as_millis())])
}

/// Pool sizing and timeouts for a store
pub fn pool_options(config: &StoreConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.pool.max_size)
        .min_connections(config.pool.min_size)
        .idle_timeout(Some(config.pool.idle_timeout))
        .acquire_timeout(config.connect_timeout)
        .test_before_acquire(true)
}

/// Opens `PgStore`s
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

#[async_trait]
impl Connector for PgConnector {
    type Pool = PgStore;

    async fn connect(&self, config: &StoreConfig) -> Result<PgStore, StoreError> {
        let pool = pool_options(config)
            .connect_with(connect_options(config))
            .await?;

        Ok(PgStore::new(config, pool))
    }
}

/// A pooled PostgreSQL store
#[derive(Debug, Clone)]
pub struct PgStore {
    name: String,
    server: String,
    pool: PgPool,
}

impl PgStore {
    pub fn new(config: &StoreConfig, pool: PgPool) -> Self {
        Self {
            name: config.name.clone(),
            server: config.server.clone(),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Append a captured change to the queue, as the capture trigger would
    pub async fn insert_captured(&self, change: &CapturedChange) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO local_ddl_audit (
                event_type, object_type, object_name, schema_name,
                ddl_statement, event_data, login_name, user_name,
                host_name, application_name, spid, start_time
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(&change.event_type)
        .bind(&change.object_type)
        .bind(&change.object_name)
        .bind(&change.schema_name)
        .bind(&change.ddl_statement)
        .bind(&change.event_data)
        .bind(&change.login_name)
        .bind(&change.user_name)
        .bind(&change.host_name)
        .bind(&change.application_name)
        .bind(change.spid)
        .bind(change.start_time)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    fn change_event_from_row(&self, row: &PgRow) -> Result<ChangeEvent, sqlx::Error> {
        Ok(ChangeEvent {
            id: row.try_get("id")?,
            database_name: self.name.clone(),
            server_name: self.server.clone(),
            schema_name: row.try_get("schema_name")?,
            object_name: row.try_get::<Option<String>, _>("object_name")?.unwrap_or_default(),
            object_type: row.try_get::<Option<String>, _>("object_type")?.unwrap_or_default(),
            event_type: row.try_get("event_type")?,
            ddl_statement: row.try_get("ddl_statement")?,
            event_data: row.try_get("event_data")?,
            login_name: row.try_get("login_name")?,
            user_name: row.try_get("user_name")?,
            host_name: row.try_get("host_name")?,
            application_name: row.try_get("application_name")?,
            spid: row.try_get("spid")?,
            start_time: row.try_get("start_time")?,
            processed: row.try_get("processed")?,
            processed_at: row.try_get("processed_at")?,
            retry_count: row.try_get::<Option<i32>, _>("retry_count")?.unwrap_or(0),
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl StorePool for PgStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_connected(&self) -> bool {
        !self.pool.is_closed() && db::verify_connection(&self.pool).await.is_ok()
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }

    async fn check_schema(&self, role: StoreRole) -> Result<bool, StoreError> {
        Ok(db::check_schema(&self.pool, role).await?)
    }

    async fn fetch_events(&self, criteria: &FetchCriteria) -> Result<Vec<ChangeEvent>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, event_type, object_type, object_name, schema_name,
                ddl_statement, event_data, login_name, user_name, host_name,
                application_name, spid, start_time, processed, processed_at,
                retry_count, error_message, created_at
            FROM local_ddl_audit
            WHERE processed = FALSE
              AND (retry_count < $1 OR retry_count IS NULL)
              AND COALESCE(object_name, '') NOT LIKE $2 ESCAPE '\'
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(criteria.max_retries)
        .bind(FetchCriteria::self_test_like_pattern())
        .bind(i64::from(criteria.batch_size))
        .fetch_all(&self.pool)
        .await?;

        let events = rows
            .iter()
            .map(|row| self.change_event_from_row(row))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    async fn mark_processed(&self, event_id: i64, processed_at: DateTime<Utc>) -> Result<(), StoreError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE local_ddl_audit
            SET processed = TRUE,
                processed_at = $2,
                retry_count = 0
            WHERE id = $1
            "#,
        )
        .bind(event_id)
        .bind(processed_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::EventNotFound(event_id));
        }

        Ok(())
    }

    async fn record_failure(&self, event_id: i64, error_message: &str) -> Result<(), StoreError> {
        let rows_affected = sqlx::query(
            r#"
            UPDATE local_ddl_audit
            SET retry_count = COALESCE(retry_count, 0) + 1,
                error_message = $2
            WHERE id = $1 AND processed = FALSE
            "#,
        )
        .bind(event_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(StoreError::EventNotFound(event_id));
        }

        Ok(())
    }

    async fn insert_relayed(&self, event: &RelayedEvent) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO schema_audit_log (
                source_event_id, database_name, server_name, schema_name,
                object_name, object_type, ddl_operation, ddl_statement,
                event_data, login_name, user_name, host_name,
                application_name, spid, start_time, source_created_at,
                natural_key, retry_count, error_message,
                processed, processed_at, created_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19, TRUE, $20, $20
            )
            RETURNING id
            "#,
        )
        .bind(event.source_event_id)
        .bind(&event.database_name)
        .bind(&event.server_name)
        .bind(&event.schema_name)
        .bind(&event.object_name)
        .bind(&event.object_type)
        .bind(&event.event_type)
        .bind(&event.ddl_statement)
        .bind(&event.event_data)
        .bind(&event.login_name)
        .bind(&event.user_name)
        .bind(&event.host_name)
        .bind(&event.application_name)
        .bind(event.spid)
        .bind(event.start_time)
        .bind(event.source_created_at)
        .bind(&event.natural_key)
        .bind(event.retry_count)
        .bind(&event.error_message)
        .bind(event.relayed_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    async fn mark_notified(&self, relayed_id: i64, notified_at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE schema_audit_log
            SET notified = TRUE,
                notified_at = $2,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(relayed_id)
        .bind(notified_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pool_options_follow_tuning() {
        let mut config = StoreConfig::new("sales", "db1", "sales");
        config.pool.max_size = 7;
        config.pool.min_size = 2;
        config.pool.idle_timeout = Duration::from_secs(45);
        config.connect_timeout = Duration::from_secs(3);

        let options = pool_options(&config);
        assert_eq!(options.get_max_connections(), 7);
        assert_eq!(options.get_min_connections(), 2);
        assert_eq!(options.get_idle_timeout(), Some(Duration::from_secs(45)));
        assert_eq!(options.get_acquire_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_connect_options_identity() {
        let config = StoreConfig::new("sales", "db1.internal", "sales_prod")
            .with_credentials("relay", "pw")
            .with_port(6543);

        let options = connect_options(&config);
        assert_eq!(options.get_host(), "db1.internal");
        assert_eq!(options.get_port(), 6543);
        assert_eq!(options.get_database(), Some("sales_prod"));
        assert_eq!(options.get_username(), "relay");
    }
}
