//! Configuration data structures for fhir-graph.
//!
//! Defines the YAML config format: server, database, traversal limits and
//! HTTP retry policy. Every field has a default, so an empty file (or no
//! file at all) is a valid configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FhirGraphError, Result};

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root configuration for fhir-graph.
///
/// Loaded from an optional YAML file, then overridden by CLI flags and the
/// `FHIR_BASE` environment variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FhirGraphConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub traversal: TraversalConfig,

    #[serde(default)]
    pub http: HttpConfig,
}

impl FhirGraphConfig {
    /// Parse a YAML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: FhirGraphConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Reject limits that would stall or never issue a query.
    pub fn validate(&self) -> Result<()> {
        if self.traversal.chunk_size == 0 {
            return Err(FhirGraphError::Config("traversal.chunk_size must be > 0".into()));
        }
        if self.traversal.max_concurrency == 0 {
            return Err(FhirGraphError::Config(
                "traversal.max_concurrency must be > 0".into(),
            ));
        }
        if self.http.max_attempts == 0 {
            return Err(FhirGraphError::Config("http.max_attempts must be > 0".into()));
        }
        if self.http.max_pages == 0 {
            return Err(FhirGraphError::Config("http.max_pages must be > 0".into()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the FHIR server, e.g. `https://example.org/fhir`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Strip trailing slashes so `{base}/{type}` never doubles them.
pub fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

// ---------------------------------------------------------------------------
// DatabaseConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file the resources are cached in (`:memory:` for a scratch run).
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

// ---------------------------------------------------------------------------
// TraversalConfig
// ---------------------------------------------------------------------------

/// Batching limits for link traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalConfig {
    /// Join-key values per query.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Chunk queries in flight at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

// ---------------------------------------------------------------------------
// HttpConfig
// ---------------------------------------------------------------------------

/// Timeouts, retry policy and the pagination cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Total attempts per page request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed pause between attempts.
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Pages followed for one logical query before giving up with an error.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: default_retry_delay_secs(),
            max_pages: default_max_pages(),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

pub const DEFAULT_DB_PATH: &str = "/tmp/fhir-graph.sqlite";

fn default_db_path() -> String {
    DEFAULT_DB_PATH.to_string()
}

fn default_chunk_size() -> usize {
    50
}

fn default_max_concurrency() -> usize {
    10
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn default_connect_timeout_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_max_pages() -> usize {
    10_000
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
