//! Structured logging and traversal diagnostics.
//!
//! This module provides:
//! - [`init_logging`]: one-time structured logging setup with `RUST_LOG` support
//! - [`default_log_file`]: per-user log file location
//! - [`TraversalMetrics`]: lock-free counters for queries, pages, retries and give-ups

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::error::Result;

/// Initialize structured logging with `RUST_LOG` environment variable support.
///
/// Defaults to `fhir_graph=info` (`fhir_graph=debug` when `debug` is set)
/// when `RUST_LOG` is not set. With a `log_file`, records are appended to
/// that file instead of stderr so they don't fight with the progress
/// spinner. Subsequent calls are silently ignored by `tracing_subscriber`.
pub fn init_logging(debug: bool, log_file: Option<&Path>) -> Result<()> {
    let default_directive = if debug {
        "fhir_graph=debug"
    } else {
        "fhir_graph=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            // try_init so double-init in tests doesn't panic
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .try_init();
        }
    }
    Ok(())
}

/// `<data dir>/fhir-graph/app.log`, or `app.log` in the working directory
/// when no home directory can be determined.
pub fn default_log_file() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.data_dir().join("fhir-graph").join("app.log"))
        .unwrap_or_else(|| PathBuf::from("app.log"))
}

/// Counters describing one traversal run.
///
/// Updated through `&self` from concurrently polled queries. Serializable
/// to JSON via [`TraversalMetrics::to_json`].
#[derive(Debug, Default)]
pub struct TraversalMetrics {
    queries_issued: AtomicU64,
    pages_fetched: AtomicU64,
    resources_received: AtomicU64,
    resources_inserted: AtomicU64,
    duplicates_skipped: AtomicU64,
    invalid_resources: AtomicU64,
    timeout_retries: AtomicU64,
    queries_gave_up: AtomicU64,
    chunks_dispatched: AtomicU64,
}

/// Point-in-time copy of [`TraversalMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queries_issued: u64,
    pub pages_fetched: u64,
    pub resources_received: u64,
    pub resources_inserted: u64,
    pub duplicates_skipped: u64,
    pub invalid_resources: u64,
    pub timeout_retries: u64,
    pub queries_gave_up: u64,
    pub chunks_dispatched: u64,
}

impl TraversalMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_query(&self) {
        self.queries_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page(&self, entries: usize) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
        self.resources_received
            .fetch_add(entries as u64, Ordering::Relaxed);
    }

    pub fn record_inserted(&self) {
        self.resources_inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid_resources.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.timeout_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_gave_up(&self) {
        self.queries_gave_up.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_chunk(&self) {
        self.chunks_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_issued: self.queries_issued.load(Ordering::Relaxed),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            resources_received: self.resources_received.load(Ordering::Relaxed),
            resources_inserted: self.resources_inserted.load(Ordering::Relaxed),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::Relaxed),
            invalid_resources: self.invalid_resources.load(Ordering::Relaxed),
            timeout_retries: self.timeout_retries.load(Ordering::Relaxed),
            queries_gave_up: self.queries_gave_up.load(Ordering::Relaxed),
            chunks_dispatched: self.chunks_dispatched.load(Ordering::Relaxed),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let s = self.snapshot();
        serde_json::json!({
            "queries_issued": s.queries_issued,
            "pages_fetched": s.pages_fetched,
            "resources_received": s.resources_received,
            "resources_inserted": s.resources_inserted,
            "duplicates_skipped": s.duplicates_skipped,
            "invalid_resources": s.invalid_resources,
            "timeout_retries": s.timeout_retries,
            "queries_gave_up": s.queries_gave_up,
            "chunks_dispatched": s.chunks_dispatched,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_logging_twice_does_not_panic() {
        init_logging(false, None).unwrap();
        init_logging(true, None).unwrap();
    }

    #[test]
    fn init_logging_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("app.log");
        init_logging(true, Some(&path)).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn default_log_file_is_named_app_log() {
        assert_eq!(default_log_file().file_name().unwrap(), "app.log");
    }

    #[test]
    fn metrics_start_at_zero() {
        let m = TraversalMetrics::new();
        assert_eq!(m.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn metrics_accumulate() {
        let m = TraversalMetrics::new();
        m.record_query();
        m.record_page(3);
        m.record_page(2);
        m.record_inserted();
        m.record_duplicate();
        m.record_retry();
        m.record_retry();
        m.record_gave_up();
        m.record_chunk();

        let s = m.snapshot();
        assert_eq!(s.queries_issued, 1);
        assert_eq!(s.pages_fetched, 2);
        assert_eq!(s.resources_received, 5);
        assert_eq!(s.resources_inserted, 1);
        assert_eq!(s.duplicates_skipped, 1);
        assert_eq!(s.timeout_retries, 2);
        assert_eq!(s.queries_gave_up, 1);
        assert_eq!(s.chunks_dispatched, 1);
    }

    #[test]
    fn metrics_to_json_has_all_fields() {
        let m = TraversalMetrics::new();
        m.record_gave_up();
        let json = m.to_json();
        assert_eq!(json["queries_gave_up"], 1);
        assert!(json.get("pages_fetched").is_some());
        assert!(json.get("invalid_resources").is_some());
    }
}
