//! API module
//!
//! Health and status endpoints for the relay process.

pub mod middleware;
pub mod routes;

pub use routes::create_router;
