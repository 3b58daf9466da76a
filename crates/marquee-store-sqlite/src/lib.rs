//! SQLite backend for the Marquee catalog.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on dedicated
//! connection threads without blocking the async runtime. Every write goes
//! through one connection, one transaction per user action.

mod encode;
mod engine;
mod graph;
mod repository;
mod schema;
mod store;
mod undo;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
