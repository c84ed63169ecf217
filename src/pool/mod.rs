//! Connection Pool Manager
//!
//! Owns one pool per `(name, server, database)` key. Pools are created on
//! first use, reused across poll cycles while they pass their health check,
//! and replaced when found disconnected. The scheduler is the only caller,
//! so the registry is plain owned state without locking.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::store::{Connector, PoolKey, StoreError, StorePool};

/// Outcome of `close_all`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseReport {
    pub closed: usize,
    /// `"<pool key>: <error>"` for every pool that failed to close
    pub failures: Vec<String>,
}

/// Registry of live pools
pub struct PoolManager<C: Connector> {
    connector: C,
    pools: HashMap<PoolKey, Arc<C::Pool>>,
}

impl<C: Connector> PoolManager<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            pools: HashMap::new(),
        }
    }

    /// Return the live pool for `config`, creating it if absent or disconnected
    pub async fn acquire(&mut self, config: &StoreConfig) -> Result<Arc<C::Pool>, StoreError> {
        let key = PoolKey::for_store(config);

        if let Some(existing) = self.pools.get(&key) {
            if existing.is_connected().await {
                return Ok(Arc::clone(existing));
            }

            tracing::warn!(pool = %key, "Pool disconnected, recreating");
            if let Some(stale) = self.pools.remove(&key) {
                if let Err(e) = stale.close().await {
                    tracing::warn!(pool = %key, error = %e, "Failed to close stale pool");
                }
            }
        }

        tracing::info!(pool = %key, "Creating connection pool for {}", config.name);

        let pool = Arc::new(self.connector.connect(config).await?);
        self.pools.insert(key.clone(), Arc::clone(&pool));

        tracing::info!(pool = %key, "Connection pool created for {}", config.name);
        Ok(pool)
    }

    /// Close every registered pool and clear the registry.
    ///
    /// Individual close failures are logged and reported, never raised.
    pub async fn close_all(&mut self) -> CloseReport {
        tracing::info!(pools = self.pools.len(), "Closing all connection pools");

        let mut report = CloseReport::default();

        for (key, pool) in self.pools.drain() {
            match pool.close().await {
                Ok(()) => report.closed += 1,
                Err(e) => {
                    tracing::error!(pool = %key, error = %e, "Failed to close pool");
                    report.failures.push(format!("{}: {}", key, e));
                }
            }
        }

        tracing::info!(
            closed = report.closed,
            failed = report.failures.len(),
            "All connection pools closed"
        );
        report
    }

    /// Whether a pool is registered for `config`
    pub fn contains(&self, config: &StoreConfig) -> bool {
        self.pools.contains_key(&PoolKey::for_store(config))
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryConnector;

    fn store(name: &str) -> StoreConfig {
        StoreConfig::new(name, "db1", name)
    }

    #[tokio::test]
    async fn test_acquire_reuses_connected_pool() {
        let connector = MemoryConnector::new();
        let mut manager = PoolManager::new(connector.clone());

        let first = manager.acquire(&store("sales")).await.unwrap();
        let second = manager.acquire(&store("sales")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_acquire_replaces_disconnected_pool() {
        let connector = MemoryConnector::new();
        let mut manager = PoolManager::new(connector.clone());

        let first = manager.acquire(&store("sales")).await.unwrap();
        first.disconnect();

        let second = manager.acquire(&store("sales")).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.serial(), 2);
        assert!(second.is_connected().await);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_is_not_registered() {
        let connector = MemoryConnector::new();
        connector.database("sales").set_faults(|f| f.fail_connect = true);
        let mut manager = PoolManager::new(connector.clone());

        assert!(manager.acquire(&store("sales")).await.is_err());
        assert!(manager.is_empty());

        connector.database("sales").set_faults(|f| f.fail_connect = false);
        assert!(manager.acquire(&store("sales")).await.is_ok());
        assert!(manager.contains(&store("sales")));
    }

    #[tokio::test]
    async fn test_distinct_keys_get_distinct_pools() {
        let connector = MemoryConnector::new();
        let mut manager = PoolManager::new(connector.clone());

        let a = manager.acquire(&StoreConfig::new("sales", "db1", "sales")).await.unwrap();
        let b = manager.acquire(&StoreConfig::new("sales", "db2", "sales")).await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn test_close_all_collects_failures() {
        let connector = MemoryConnector::new();
        connector.database("hr").set_faults(|f| f.fail_close = true);
        let mut manager = PoolManager::new(connector.clone());

        let sales = manager.acquire(&store("sales")).await.unwrap();
        manager.acquire(&store("hr")).await.unwrap();

        let report = manager.close_all().await;
        assert_eq!(report.closed, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("hr-db1-hr"));
        assert!(manager.is_empty());
        assert!(!sales.is_connected().await);
    }
}
