//! Store Errors

/// Errors raised by a store backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Pool was closed or the server is unreachable
    #[error("Store {0} is disconnected")]
    Disconnected(String),

    /// Update matched no queue row
    #[error("Event {0} not found")]
    EventNotFound(i64),

    /// Backend refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// True when the failure is about reaching the store rather than a statement
    pub fn is_connectivity(&self) -> bool {
        match self {
            StoreError::Disconnected(_) => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::Io(_)
                    | sqlx::Error::Tls(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_connectivity() {
        assert!(StoreError::Disconnected("sales".to_string()).is_connectivity());
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_connectivity());
        assert!(!StoreError::EventNotFound(1).is_connectivity());
        assert!(!StoreError::Database(sqlx::Error::RowNotFound).is_connectivity());
    }
}
