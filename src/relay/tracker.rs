//! Retry/Failure Tracker
//!
//! The only path that increases `retry_count`. Once the count reaches the
//! configured maximum the fetch predicate stops returning the event; the row
//! stays in the queue for manual inspection.

use crate::store::{StoreError, StorePool};

/// Longest error message written to `error_message`
pub const MAX_ERROR_MESSAGE_LEN: usize = 1000;

/// Collapse whitespace and cut the message to `MAX_ERROR_MESSAGE_LEN` chars
pub fn normalize_error_message(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    if collapsed.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return collapsed;
    }

    let mut truncated: String = collapsed.chars().take(MAX_ERROR_MESSAGE_LEN - 3).collect();
    truncated.push_str("...");
    truncated
}

/// Record one failed relay attempt for `event_id`
pub async fn record_failure<P>(source: &P, event_id: i64, error: &str) -> Result<(), StoreError>
where
    P: StorePool + ?Sized,
{
    let message = normalize_error_message(error);

    source.record_failure(event_id, &message).await?;

    tracing::debug!(
        store = %source.name(),
        event_id = event_id,
        "Recorded relay failure"
    );

    Ok(())
}
