//! Configuration: YAML schema with serde defaults.

pub mod schema;

pub use schema::{
    normalize_base_url, DatabaseConfig, FhirGraphConfig, HttpConfig, ServerConfig,
    TraversalConfig, DEFAULT_DB_PATH,
};
