//! Core Service Layer
//!
//! Shared infrastructure for the chat server: accounts, data models,
//! configuration, errors and the message store.

pub mod auth;
pub mod config;
pub mod ctx;
pub mod db;
pub mod error;
pub mod models;
pub mod router;
pub mod store;

// Re-exports for convenience
pub use config::{AppState, ServerConfig};
pub use ctx::Ctx;
pub use error::{Error, Result};
pub use router::router;
