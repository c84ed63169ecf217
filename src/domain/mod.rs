//! Domain module
//!
//! Typed event records moved by the relay.

mod event;

pub use event::{
    natural_key, CapturedChange, ChangeEvent, ChangeNotice, DdlOperation, RelayedEvent,
};
