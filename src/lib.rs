//! Reconciliation and realtime-sync core of a personal finance tracker.
//!
//! Keeps an in-memory working set of transactions, savings balance and
//! savings history consistent across two interchangeable backends, a
//! polling fallback, push change notifications and optimistic local edits.

pub mod auth;
pub mod config;
pub mod error;
pub mod persistence;
pub mod polling;
pub mod records;
pub mod runtime;
pub mod state;
pub mod store;
pub mod streaming;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use runtime::{RefreshReport, SyncSession};
