//! Crate-wide error type.
//!
//! Variants line up with how failures are handled during a traversal:
//! validation problems are local to one insert, timeouts are retried by the
//! query executor, and everything else aborts the run with its cause intact.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FhirGraphError {
    /// A resource is missing `id` or `resourceType`.
    #[error("invalid resource: {0}")]
    Validation(String),

    /// Connect or read timeout. Retried by the executor, never fatal on its own.
    #[error("timed out querying {url}: {source}")]
    Timeout {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server's paging links broke the pagination policy.
    #[error("pagination error: {0}")]
    Pagination(String),

    /// The graph definition cannot drive a traversal.
    #[error("invalid graph definition: {0}")]
    GraphDefinition(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FhirGraphError {
    /// Whether the failure is worth retrying with the same request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, FhirGraphError>;
