//! Webhook delivery

use std::time::Duration;

use async_trait::async_trait;

use super::embed::{self, Embed, WebhookPayload};
use super::{Notifier, NotifyError};
use crate::domain::ChangeNotice;

const WEBHOOK_PREFIX: &str = "https://discord.com/api/webhooks/";

/// Trim, normalise the legacy host and check the
/// `https://discord.com/api/webhooks/<id>/<token>` shape.
pub fn normalize_webhook_url(raw: &str) -> Result<String, NotifyError> {
    let url = raw.trim().replacen("discordapp.com", "discord.com", 1);

    let rest = url
        .strip_prefix(WEBHOOK_PREFIX)
        .ok_or_else(|| NotifyError::InvalidWebhookUrl("expected https://discord.com/api/webhooks/ID/TOKEN".to_string()))?;

    let (id, token) = rest
        .split_once('/')
        .ok_or_else(|| NotifyError::InvalidWebhookUrl("missing webhook token".to_string()))?;

    let id_ok = !id.is_empty() && id.chars().all(|c| c.is_ascii_digit());
    let token_ok = !token.is_empty()
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if !id_ok || !token_ok {
        return Err(NotifyError::InvalidWebhookUrl(
            "malformed webhook id or token".to_string(),
        ));
    }

    Ok(url)
}

/// Posts embeds to a webhook over HTTPS
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let url = normalize_webhook_url(url)?;

        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self { client, url })
    }

    async fn send(&self, username: &str, embed: Embed) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            username: username.to_string(),
            embeds: vec![embed],
        };

        let response = self.client.post(&self.url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }

        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_change(&self, change: &ChangeNotice) -> Result<(), NotifyError> {
        self.send(embed::CHANGE_USERNAME, embed::change_embed(change)).await?;

        tracing::info!(
            database = %change.database_name,
            event_id = change.id,
            "Notification sent for {} {} {}",
            change.ddl_operation,
            change.object_type,
            change.object_name
        );
        Ok(())
    }

    async fn notify_status(&self, status: &str, details: Option<&str>) -> Result<(), NotifyError> {
        self.send(embed::SYSTEM_USERNAME, embed::status_embed(status, details))
            .await
    }

    async fn notify_error(&self, context: &str, error: &str) -> Result<(), NotifyError> {
        self.send(embed::SYSTEM_USERNAME, embed::error_embed(context, error))
            .await?;
        tracing::info!("System error notification sent");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "webhook"
    }
}
