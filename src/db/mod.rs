//! Database layer: SQLite schema for the resource cache.

pub mod schema;

pub use schema::{initialize_database, IN_MEMORY};
