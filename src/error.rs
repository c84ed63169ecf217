//! Error handling module
//!
//! Relay error taxonomy. Every variant is contained at the event or store
//! boundary by the worker; none of them stops the scheduler.

use crate::notify::NotifyError;
use crate::store::StoreError;

/// Relay-wide Result type
pub type RelayResult<T> = Result<T, RelayError>;

/// Relay error types
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Pool creation or connect failure; the store is skipped for this cycle
    #[error("Cannot connect to store {store}: {source}")]
    Connectivity {
        store: String,
        #[source]
        source: StoreError,
    },

    /// Fetch or write failure
    #[error("Query failed on store {store}: {source}")]
    Query {
        store: String,
        #[source]
        source: StoreError,
    },

    /// A relay step failed for one event
    #[error("Processing failed for event {event_id}: {reason}")]
    Processing { event_id: i64, reason: String },

    /// Store lacks the table its role requires
    #[error("Store {store} is missing table {table}")]
    MissingTable { store: String, table: &'static str },

    /// Notification sink failure; logged only
    #[error("Notification failed: {0}")]
    Notification(#[from] NotifyError),
}

impl RelayError {
    /// Wrap a store error, classifying it as connectivity or query failure
    pub fn from_store(store: &str, source: StoreError) -> Self {
        if source.is_connectivity() {
            RelayError::Connectivity {
                store: store.to_string(),
                source,
            }
        } else {
            RelayError::Query {
                store: store.to_string(),
                source,
            }
        }
    }

    /// Stable label for logs and reports
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::Connectivity { .. } => "connectivity",
            RelayError::Query { .. } => "query",
            RelayError::Processing { .. } => "processing",
            RelayError::MissingTable { .. } => "schema",
            RelayError::Notification(_) => "notification",
        }
    }
}
