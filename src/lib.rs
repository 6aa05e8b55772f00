//! fhir-graph: follow a FHIR GraphDefinition across a FHIR server.
//!
//! Runs a root search, then walks the definition's links, batching join keys
//! into follow-up searches and caching every resource in a local SQLite
//! store. The cached graph can then be rolled up into per-type counts.

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod graph;
pub mod observability;
pub mod progress;
pub mod query;
pub mod store;
pub mod types;
