//! In-memory store backend
//!
//! Keeps the queue and audit-log tables of every store in process memory.
//! Used for dry runs and by the test suite; `Faults` lets a caller make
//! individual operations fail.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{Connector, StoreError, StorePool, StoreRole};
use crate::config::StoreConfig;
use crate::domain::{CapturedChange, ChangeEvent, RelayedEvent};
use crate::relay::FetchCriteria;

/// Failure switches for one in-memory database
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub fail_connect: bool,
    pub fail_fetch: bool,
    pub fail_mark_processed: bool,
    pub fail_record_failure: bool,
    pub fail_close: bool,
    /// Central inserts fail for events with these object names
    pub fail_insert_objects: HashSet<String>,
}

/// Row of the source queue table
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRow {
    pub id: i64,
    pub change: CapturedChange,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub retry_count: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// Row of the central audit log table
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    pub id: i64,
    pub event: RelayedEvent,
    pub notified: bool,
    pub notified_at: Option<DateTime<Utc>>,
}

/// Tables of one in-memory database
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    queue: Mutex<Vec<QueueRow>>,
    audit_log: Mutex<Vec<AuditRow>>,
    faults: Mutex<Faults>,
}

impl MemoryDatabase {
    /// Append a captured change with `created_at = now`
    pub fn insert_change(&self, change: CapturedChange) -> i64 {
        self.insert_change_at(change, Utc::now())
    }

    /// Append a captured change with an explicit `created_at`
    pub fn insert_change_at(&self, change: CapturedChange, created_at: DateTime<Utc>) -> i64 {
        let mut queue = self.queue.lock();
        let id = queue.last().map(|r| r.id + 1).unwrap_or(1);
        queue.push(QueueRow {
            id,
            change,
            processed: false,
            processed_at: None,
            error_message: None,
            retry_count: Some(0),
            created_at,
        });
        id
    }

    /// Overwrite the stored retry count, including NULL
    pub fn set_retry_count(&self, event_id: i64, retry_count: Option<i32>) {
        if let Some(row) = self.queue.lock().iter_mut().find(|r| r.id == event_id) {
            row.retry_count = retry_count;
        }
    }

    pub fn queue_row(&self, event_id: i64) -> Option<QueueRow> {
        self.queue.lock().iter().find(|r| r.id == event_id).cloned()
    }

    pub fn queue(&self) -> Vec<QueueRow> {
        self.queue.lock().clone()
    }

    pub fn audit_log(&self) -> Vec<AuditRow> {
        self.audit_log.lock().clone()
    }

    /// Edit the failure switches
    pub fn set_faults<F: FnOnce(&mut Faults)>(&self, edit: F) {
        edit(&mut self.faults.lock());
    }

    fn faults(&self) -> Faults {
        self.faults.lock().clone()
    }
}

/// Opens `MemoryStore`s; databases are looked up by store name
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    databases: Arc<Mutex<HashMap<String, Arc<MemoryDatabase>>>>,
    connects: Arc<AtomicUsize>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Database for a store name, created empty on first use
    pub fn database(&self, name: &str) -> Arc<MemoryDatabase> {
        Arc::clone(self.databases.lock().entry(name.to_string()).or_default())
    }

    /// Number of successful `connect` calls
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Pool = MemoryStore;

    async fn connect(&self, config: &StoreConfig) -> Result<MemoryStore, StoreError> {
        let db = self.database(&config.name);
        if db.faults().fail_connect {
            return Err(StoreError::Disconnected(config.name.clone()));
        }

        let serial = self.connects.fetch_add(1, Ordering::SeqCst) + 1;

        Ok(MemoryStore {
            name: config.name.clone(),
            server: config.server.clone(),
            serial,
            db,
            connected: AtomicBool::new(true),
        })
    }
}

/// Pool handle onto a `MemoryDatabase`
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    server: String,
    serial: usize,
    db: Arc<MemoryDatabase>,
    connected: AtomicBool,
}

impl MemoryStore {
    /// Which `connect` call produced this pool (1-based)
    pub fn serial(&self) -> usize {
        self.serial
    }

    /// Simulate a dropped connection
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.db
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Disconnected(self.name.clone()))
        }
    }

    fn to_change_event(&self, row: &QueueRow) -> ChangeEvent {
        let change = &row.change;
        ChangeEvent {
            id: row.id,
            database_name: self.name.clone(),
            server_name: self.server.clone(),
            schema_name: change.schema_name.clone(),
            object_name: change.object_name.clone(),
            object_type: change.object_type.clone(),
            event_type: change.event_type.clone(),
            ddl_statement: change.ddl_statement.clone(),
            event_data: change.event_data.clone(),
            login_name: change.login_name.clone(),
            user_name: change.user_name.clone(),
            host_name: change.host_name.clone(),
            application_name: change.application_name.clone(),
            spid: change.spid,
            start_time: change.start_time,
            processed: row.processed,
            processed_at: row.processed_at,
            retry_count: row.retry_count.unwrap_or(0),
            error_message: row.error_message.clone(),
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl StorePool for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.connected.store(false, Ordering::SeqCst);
        if self.db.faults().fail_close {
            return Err(StoreError::Unavailable(format!("close failed for {}", self.name)));
        }
        Ok(())
    }

    async fn check_schema(&self, _role: StoreRole) -> Result<bool, StoreError> {
        self.ensure_connected()?;
        Ok(true)
    }

    async fn fetch_events(&self, criteria: &FetchCriteria) -> Result<Vec<ChangeEvent>, StoreError> {
        self.ensure_connected()?;
        if self.db.faults().fail_fetch {
            return Err(StoreError::Unavailable(format!("fetch failed for {}", self.name)));
        }

        let queue = self.db.queue.lock();
        let mut rows: Vec<&QueueRow> = queue
            .iter()
            .filter(|r| criteria.is_eligible(r.processed, r.retry_count, &r.change.object_name))
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        Ok(rows
            .into_iter()
            .take(criteria.batch_size as usize)
            .map(|r| self.to_change_event(r))
            .collect())
    }

    async fn mark_processed(&self, event_id: i64, processed_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.ensure_connected()?;
        if self.db.faults().fail_mark_processed {
            return Err(StoreError::Unavailable(format!("update failed for {}", self.name)));
        }

        let mut queue = self.db.queue.lock();
        let row = queue
            .iter_mut()
            .find(|r| r.id == event_id)
            .ok_or(StoreError::EventNotFound(event_id))?;

        row.processed = true;
        row.processed_at = Some(processed_at);
        row.retry_count = Some(0);
        Ok(())
    }

    async fn record_failure(&self, event_id: i64, error_message: &str) -> Result<(), StoreError> {
        self.ensure_connected()?;
        if self.db.faults().fail_record_failure {
            return Err(StoreError::Unavailable(format!("update failed for {}", self.name)));
        }

        let mut queue = self.db.queue.lock();
        let row = queue
            .iter_mut()
            .find(|r| r.id == event_id && !r.processed)
            .ok_or(StoreError::EventNotFound(event_id))?;

        row.retry_count = Some(row.retry_count.unwrap_or(0) + 1);
        row.error_message = Some(error_message.to_string());
        Ok(())
    }

    async fn insert_relayed(&self, event: &RelayedEvent) -> Result<i64, StoreError> {
        self.ensure_connected()?;
        if self.db.faults().fail_insert_objects.contains(&event.object_name) {
            return Err(StoreError::Unavailable(format!(
                "insert rejected for {}",
                event.object_name
            )));
        }

        let mut log = self.db.audit_log.lock();
        let id = log.last().map(|r| r.id + 1).unwrap_or(1);
        log.push(AuditRow {
            id,
            event: event.clone(),
            notified: false,
            notified_at: None,
        });
        Ok(id)
    }

    async fn mark_notified(&self, relayed_id: i64, notified_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.ensure_connected()?;

        let mut log = self.db.audit_log.lock();
        let row = log
            .iter_mut()
            .find(|r| r.id == relayed_id)
            .ok_or(StoreError::EventNotFound(relayed_id))?;

        row.notified = true;
        row.notified_at = Some(notified_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_fault() {
        let connector = MemoryConnector::new();
        connector.database("sales").set_faults(|f| f.fail_connect = true);

        let result = connector.connect(&StoreConfig::new("sales", "db1", "sales")).await;
        assert!(matches!(result, Err(StoreError::Disconnected(_))));
        assert_eq!(connector.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnected_store_rejects_queries() {
        let connector = MemoryConnector::new();
        let store = connector
            .connect(&StoreConfig::new("sales", "db1", "sales"))
            .await
            .unwrap();

        store.disconnect();
        assert!(!store.is_connected().await);

        let result = store.fetch_events(&FetchCriteria::new(10, 3)).await;
        assert!(matches!(result, Err(StoreError::Disconnected(_))));
    }

    #[tokio::test]
    async fn test_record_failure_treats_null_as_zero() {
        let connector = MemoryConnector::new();
        let db = connector.database("sales");
        let id = db.insert_change(CapturedChange::new("CREATE_TABLE", "TABLE", "orders"));
        db.set_retry_count(id, None);

        let store = connector
            .connect(&StoreConfig::new("sales", "db1", "sales"))
            .await
            .unwrap();
        store.record_failure(id, "boom").await.unwrap();

        let row = db.queue_row(id).unwrap();
        assert_eq!(row.retry_count, Some(1));
        assert_eq!(row.error_message.as_deref(), Some("boom"));
        assert!(!row.processed);
    }

    #[tokio::test]
    async fn test_events_carry_store_provenance() {
        let connector = MemoryConnector::new();
        connector
            .database("sales")
            .insert_change(CapturedChange::new("CREATE_TABLE", "TABLE", "orders"));

        let store = connector
            .connect(&StoreConfig::new("sales", "db-east", "sales"))
            .await
            .unwrap();
        let events = store.fetch_events(&FetchCriteria::new(10, 3)).await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].database_name, "sales");
        assert_eq!(events[0].server_name, "db-east");
    }
}
