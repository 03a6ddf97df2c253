//! Chat Service Layer
//!
//! Presence tracking, live delivery and the message HTTP API.

pub mod handlers;
pub mod presence;
pub mod protocol;

pub use handlers::router;
