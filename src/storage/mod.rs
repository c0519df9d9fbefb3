//! Storage layer for runs, node records and suspended states.

mod models;
mod sqlite;

pub use models::*;
pub use sqlite::SqliteStorage;
