//! Relay Pipeline
//!
//! Moves one event: central write, mark processed at the source, notify.
//! There is no transaction spanning the two stores. If the central write
//! succeeds and marking the source fails, the central row stays and the
//! event is relayed again on a later cycle; consumers dedup on
//! `natural_key`.

use chrono::Utc;

use crate::domain::{ChangeEvent, ChangeNotice, RelayedEvent};
use crate::error::RelayError;
use crate::notify::Notifier;
use crate::store::StorePool;

/// Result of a successful relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayReceipt {
    /// Id of the new central audit log row
    pub relayed_id: i64,
    /// Whether the notification sink accepted the event
    pub notified: bool,
}

/// Relay one fetched event from `source` to `central`.
///
/// A notification failure is logged and never turns the relay into a failure.
pub async fn relay_event<P>(
    event: &ChangeEvent,
    central: &P,
    source: &P,
    notifier: &dyn Notifier,
) -> Result<RelayReceipt, RelayError>
where
    P: StorePool + ?Sized,
{
    tracing::debug!(
        store = %source.name(),
        event_id = event.id,
        "Relaying {} {} {}",
        event.event_type,
        event.object_type,
        event.object_name
    );

    // 1. Central write
    let relayed = RelayedEvent::from_change(event, Utc::now());
    let relayed_id = central
        .insert_relayed(&relayed)
        .await
        .map_err(|e| RelayError::from_store(central.name(), e))?;

    // 2. Mark processed at the source; the central row is not undone on failure
    if let Err(e) = source.mark_processed(event.id, Utc::now()).await {
        tracing::warn!(
            store = %source.name(),
            event_id = event.id,
            relayed_id = relayed_id,
            error = %e,
            "Central write kept but source not marked processed; event will be relayed again"
        );
        return Err(RelayError::Processing {
            event_id: event.id,
            reason: format!("relayed as {} but marking processed failed: {}", relayed_id, e),
        });
    }

    // 3. Notify
    let notified = match notifier.notify_change(&ChangeNotice::from(event)).await {
        Ok(()) => {
            if let Err(e) = central.mark_notified(relayed_id, Utc::now()).await {
                tracing::warn!(relayed_id = relayed_id, error = %e, "Failed to flag audit row as notified");
            }
            true
        }
        Err(e) => {
            let err = RelayError::from(e);
            tracing::warn!(
                store = %source.name(),
                event_id = event.id,
                error = %err,
                "Notification failed"
            );
            false
        }
    };

    Ok(RelayReceipt {
        relayed_id,
        notified,
    })
}
