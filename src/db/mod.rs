//! Durable storage for evaluations.
//!
//! SQLite-backed append-only measurement log with dedup-on-write for app
//! statuses, a bucketed range query and retention purging.

mod models;
mod store;

pub use models::*;
pub use store::*;
