//! Message storage module
//!
//! Durable record of sent messages in SQLite: append, conversation
//! queries, seen-flag bookkeeping and unseen counts.

pub mod message_store;

pub use message_store::MessageStore;
