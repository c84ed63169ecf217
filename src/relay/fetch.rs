//! Event Fetch
//!
//! Selection predicate and ordering for the source queue.

use std::cmp::Ordering;

use crate::domain::ChangeEvent;
use crate::store::{StoreError, StorePool};

/// Object name prefix used by the capture self-test; such events are never relayed
pub const SELF_TEST_PREFIX: &str = "temp_test_trigger_";

/// Which queue rows a fetch returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchCriteria {
    /// Upper bound on rows returned
    pub batch_size: u32,
    /// Rows with `retry_count >= max_retries` are excluded
    pub max_retries: i32,
}

impl FetchCriteria {
    pub fn new(batch_size: u32, max_retries: i32) -> Self {
        Self {
            batch_size,
            max_retries,
        }
    }

    /// `processed = false AND (retry_count < max OR retry_count IS NULL)`
    /// and not a self-test object
    pub fn is_eligible(&self, processed: bool, retry_count: Option<i32>, object_name: &str) -> bool {
        !processed
            && retry_count.unwrap_or(0) < self.max_retries
            && !is_self_test_object(object_name)
    }

    /// `LIKE` pattern matching self-test objects, with `_` escaped
    pub fn self_test_like_pattern() -> String {
        let mut pattern = SELF_TEST_PREFIX.replace('\\', "\\\\").replace('_', "\\_");
        pattern.push('%');
        pattern
    }
}

pub fn is_self_test_object(object_name: &str) -> bool {
    object_name.starts_with(SELF_TEST_PREFIX)
}

/// Capture order: `created_at`, then queue id
pub fn fetch_order(a: &ChangeEvent, b: &ChangeEvent) -> Ordering {
    a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
}

/// Whether a backend's batch satisfies `criteria`: eligible rows only,
/// in capture order, at most `batch_size` of them
pub fn honours_criteria(events: &[ChangeEvent], criteria: &FetchCriteria) -> bool {
    events.len() <= criteria.batch_size as usize
        && events
            .iter()
            .all(|e| criteria.is_eligible(e.processed, Some(e.retry_count), &e.object_name))
        && events
            .windows(2)
            .all(|pair| fetch_order(&pair[0], &pair[1]) == Ordering::Less)
}

/// Fetch the next ordered batch of eligible events from one source store.
///
/// Returns an empty batch when nothing is pending. Filtering, ordering and
/// the batch limit are the backend's job.
pub async fn fetch_batch<P>(source: &P, criteria: &FetchCriteria) -> Result<Vec<ChangeEvent>, StoreError>
where
    P: StorePool + ?Sized,
{
    let events = source.fetch_events(criteria).await?;

    debug_assert!(
        honours_criteria(&events, criteria),
        "store {} returned a batch outside the fetch criteria",
        source.name()
    );

    Ok(events)
}
