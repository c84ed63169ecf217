//! ddl_relay Library
//!
//! Re-exports modules for integration testing and external use.

pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod jobs;
pub mod notify;
pub mod pool;
pub mod relay;
pub mod store;

pub use config::Config;
pub use error::{RelayError, RelayResult};
pub use domain::{ChangeEvent, ChangeNotice, DdlOperation, RelayedEvent};
