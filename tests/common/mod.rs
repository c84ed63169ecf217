//! Common test utilities

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use ddl_relay::config::{RelaySettings, StoreConfig};
use ddl_relay::domain::ChangeNotice;
use ddl_relay::notify::{Notifier, NotifyError};
use ddl_relay::pool::PoolManager;
use ddl_relay::relay::RelayWorker;
use ddl_relay::store::MemoryConnector;

pub const CENTRAL: &str = "audit";

pub fn source_store(name: &str) -> StoreConfig {
    StoreConfig::new(name, "db1", name).with_credentials("relay", "secret")
}

pub fn central_store() -> StoreConfig {
    StoreConfig::new(CENTRAL, "db0", "schema_audit").with_credentials("relay", "secret")
}

/// Settings used by the end-to-end scenarios: batch 50, max 3 retries
pub fn settings() -> RelaySettings {
    RelaySettings::default()
}

/// Worker over the in-memory backend, polling `sources` in order
pub fn worker(
    connector: &MemoryConnector,
    sources: &[&str],
    settings: RelaySettings,
    notifier: Arc<dyn Notifier>,
) -> RelayWorker<MemoryConnector> {
    RelayWorker::new(
        PoolManager::new(connector.clone()),
        central_store(),
        sources.iter().map(|name| source_store(name)).collect(),
        settings,
        notifier,
    )
}

/// Notifier that keeps everything it is given
#[derive(Default)]
pub struct RecordingNotifier {
    pub changes: Mutex<Vec<ChangeNotice>>,
    pub statuses: Mutex<Vec<String>>,
    pub errors: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn object_names(&self) -> Vec<String> {
        self.changes
            .lock()
            .iter()
            .map(|c| c.object_name.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_change(&self, change: &ChangeNotice) -> Result<(), NotifyError> {
        self.changes.lock().push(change.clone());
        Ok(())
    }

    async fn notify_status(&self, status: &str, _details: Option<&str>) -> Result<(), NotifyError> {
        self.statuses.lock().push(status.to_string());
        Ok(())
    }

    async fn notify_error(&self, context: &str, error: &str) -> Result<(), NotifyError> {
        self.errors.lock().push(format!("{}: {}", context, error));
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "recording"
    }
}

/// Notifier whose channel is always down
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify_change(&self, _change: &ChangeNotice) -> Result<(), NotifyError> {
        Err(NotifyError::Rejected { status: 503 })
    }

    async fn notify_status(&self, _status: &str, _details: Option<&str>) -> Result<(), NotifyError> {
        Err(NotifyError::Rejected { status: 503 })
    }

    async fn notify_error(&self, _context: &str, _error: &str) -> Result<(), NotifyError> {
        Err(NotifyError::Rejected { status: 503 })
    }

    fn kind(&self) -> &'static str {
        "failing"
    }
}
