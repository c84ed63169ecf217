//! Relay module
//!
//! Fetch, relay and failure tracking for source queue events.

pub mod fetch;
pub mod pipeline;
pub mod tracker;
mod worker;

pub use fetch::{fetch_batch, FetchCriteria, SELF_TEST_PREFIX};
pub use pipeline::{relay_event, RelayReceipt};
pub use tracker::{normalize_error_message, record_failure};
pub use worker::{CycleReport, RelayWorker, SourceReport};
