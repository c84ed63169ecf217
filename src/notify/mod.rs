//! Notification module
//!
//! Best-effort delivery of relayed changes and system status to an external
//! channel. Callers log failures and never roll them back into relay state.

pub mod embed;
mod webhook;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::NotifierConfig;
use crate::domain::ChangeNotice;

pub use webhook::{normalize_webhook_url, WebhookNotifier};

/// Notification sink
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce one relayed schema change
    async fn notify_change(&self, change: &ChangeNotice) -> Result<(), NotifyError>;

    /// System status message (startup, shutdown)
    async fn notify_status(&self, status: &str, details: Option<&str>) -> Result<(), NotifyError>;

    /// System-level failure (not per-event failures)
    async fn notify_error(&self, context: &str, error: &str) -> Result<(), NotifyError>;

    /// Delivery mechanism, for status reporting
    fn kind(&self) -> &'static str;
}

/// Notifier used when no channel is configured: changes are only logged
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_change(&self, change: &ChangeNotice) -> Result<(), NotifyError> {
        tracing::debug!(
            database = %change.database_name,
            event_id = change.id,
            operation = %change.ddl_operation,
            object = %change.qualified_name(),
            "Schema change relayed"
        );
        Ok(())
    }

    async fn notify_status(&self, status: &str, details: Option<&str>) -> Result<(), NotifyError> {
        tracing::debug!(status = %status, details = ?details, "System status");
        Ok(())
    }

    async fn notify_error(&self, context: &str, error: &str) -> Result<(), NotifyError> {
        tracing::debug!(context = %context, error = %error, "System error");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "none"
    }
}

/// Build the notifier described by configuration.
///
/// An invalid webhook URL disables notifications instead of failing startup.
pub fn from_config(config: &NotifierConfig) -> Arc<dyn Notifier> {
    let Some(url) = config.webhook_url.as_deref() else {
        tracing::info!("Notification webhook not configured - notifications disabled");
        return Arc::new(LogNotifier);
    };

    match WebhookNotifier::new(url, config.request_timeout) {
        Ok(notifier) => {
            tracing::info!("Notification webhook initialized");
            Arc::new(notifier)
        }
        Err(e) => {
            tracing::error!(error = %e, "Invalid notification webhook - notifications disabled");
            Arc::new(LogNotifier)
        }
    }
}

/// Notification errors
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook rejected the message with status {status}")]
    Rejected { status: u16 },

    #[error("Invalid webhook URL: {0}")]
    InvalidWebhookUrl(String),

    #[error("Notification channel unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_from_config_without_webhook() {
        let notifier = from_config(&NotifierConfig::default());
        assert_eq!(notifier.kind(), "none");
    }

    #[test]
    fn test_from_config_with_invalid_webhook() {
        let notifier = from_config(&NotifierConfig {
            webhook_url: Some("https://example.com/hook".to_string()),
            request_timeout: Duration::from_secs(5),
        });
        assert_eq!(notifier.kind(), "none");
    }

    #[test]
    fn test_from_config_with_webhook() {
        let notifier = from_config(&NotifierConfig {
            webhook_url: Some("https://discord.com/api/webhooks/123456/abc-DEF_1".to_string()),
            request_timeout: Duration::from_secs(5),
        });
        assert_eq!(notifier.kind(), "webhook");
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        let notifier = LogNotifier;
        assert!(notifier.notify_status("online", None).await.is_ok());
        assert!(notifier.notify_error("startup", "boom").await.is_ok());
    }
}
