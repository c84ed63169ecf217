//! Store module
//!
//! The seam between the relay and the databases it talks to. A `Connector`
//! opens a `StorePool` for a `StoreConfig`; the pool exposes the handful of
//! queue and audit-log operations the relay needs as typed records.

mod error;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::StoreConfig;
use crate::domain::{ChangeEvent, RelayedEvent};
use crate::relay::FetchCriteria;

pub use error::StoreError;
pub use memory::{MemoryConnector, MemoryDatabase, MemoryStore};
pub use postgres::{PgConnector, PgStore};

/// Source queue table name
pub const SOURCE_TABLE: &str = "local_ddl_audit";

/// Central audit log table name
pub const CENTRAL_TABLE: &str = "schema_audit_log";

/// Registry key of a pool: `(name, server, database)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub name: String,
    pub server: String,
    pub database: String,
}

impl PoolKey {
    pub fn for_store(config: &StoreConfig) -> Self {
        Self {
            name: config.name.clone(),
            server: config.server.clone(),
            database: config.database.clone(),
        }
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.server, self.database)
    }
}

/// Which table a store is expected to hold
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreRole {
    Source,
    Central,
}

impl StoreRole {
    pub fn table(&self) -> &'static str {
        match self {
            StoreRole::Source => SOURCE_TABLE,
            StoreRole::Central => CENTRAL_TABLE,
        }
    }
}

/// A live, pooled handle to one store
#[async_trait]
pub trait StorePool: Send + Sync + 'static {
    /// Store name from configuration
    fn name(&self) -> &str;

    /// Health check; false once the pool is closed or unreachable
    async fn is_connected(&self) -> bool;

    /// Close every connection of the pool
    async fn close(&self) -> Result<(), StoreError>;

    /// Check that the table for `role` exists
    async fn check_schema(&self, role: StoreRole) -> Result<bool, StoreError>;

    /// Select unprocessed queue rows matching `criteria`
    async fn fetch_events(&self, criteria: &FetchCriteria) -> Result<Vec<ChangeEvent>, StoreError>;

    /// Set `processed`, `processed_at` and reset `retry_count` to 0
    async fn mark_processed(
        &self,
        event_id: i64,
        processed_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Increment `retry_count` (NULL counts as 0) and store `error_message`
    async fn record_failure(&self, event_id: i64, error_message: &str) -> Result<(), StoreError>;

    /// Append a row to the central audit log, returning its id
    async fn insert_relayed(&self, event: &RelayedEvent) -> Result<i64, StoreError>;

    /// Flag a central audit log row as delivered to the notification sink
    async fn mark_notified(
        &self,
        relayed_id: i64,
        notified_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Opens pools for store configurations
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Pool: StorePool;

    /// Create and connect a pool using the store's tuning parameters
    async fn connect(&self, config: &StoreConfig) -> Result<Self::Pool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_key_display() {
        let config = StoreConfig::new("sales", "db1", "sales_prod");
        let key = PoolKey::for_store(&config);
        assert_eq!(key.to_string(), "sales-db1-sales_prod");
    }

    #[test]
    fn test_pool_key_ignores_credentials() {
        let a = StoreConfig::new("sales", "db1", "sales").with_credentials("a", "1");
        let b = StoreConfig::new("sales", "db1", "sales").with_credentials("b", "2");
        assert_eq!(PoolKey::for_store(&a), PoolKey::for_store(&b));
    }

    #[test]
    fn test_store_role_table() {
        assert_eq!(StoreRole::Source.table(), "local_ddl_audit");
        assert_eq!(StoreRole::Central.table(), "schema_audit_log");
    }
}
