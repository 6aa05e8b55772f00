//! Paginated, retrying FHIR search executor.
//!
//! One call to [`QueryExecutor::execute`] turns a search URL into the full
//! result set: every page is fetched, every resource on it is written to the
//! [`ResourceStore`], and the collected resources are returned.
//!
//! # Failure policy
//!
//! - Connect/read timeouts are retried with a fixed delay. When the attempt
//!   budget runs out the page is abandoned: whatever earlier pages produced
//!   is returned and the give-up counter is bumped.
//! - Any other transport failure or a non-success status is fatal and
//!   propagates to the caller.
//! - Following more than `max_pages` pages, or a `next` link pointing back
//!   at a page already fetched, is fatal.
//! - Entries that fail validation are logged and skipped.

use std::collections::HashSet;
use std::time::Duration;

use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::HttpConfig;
use crate::error::{FhirGraphError, Result};
use crate::observability::TraversalMetrics;
use crate::query::bundle::Bundle;
use crate::store::ResourceStore;
use crate::types::{InsertOutcome, Resource};

const FHIR_JSON: &str = "application/fhir+json";

// ---------------------------------------------------------------------------
// ExecutorOptions
// ---------------------------------------------------------------------------

/// Timeouts and retry budget for the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutorOptions {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Total attempts per page, including the first.
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub max_pages: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self::from(&HttpConfig::default())
    }
}

impl From<&HttpConfig> for ExecutorOptions {
    fn from(http: &HttpConfig) -> Self {
        Self {
            request_timeout: http.request_timeout(),
            connect_timeout: http.connect_timeout(),
            max_attempts: http.max_attempts,
            retry_delay: http.retry_delay(),
            max_pages: http.max_pages,
        }
    }
}

// ---------------------------------------------------------------------------
// QueryExecutor
// ---------------------------------------------------------------------------

/// Executes search URLs against a FHIR server and caches the results.
pub struct QueryExecutor<'a> {
    client: Client,
    store: &'a ResourceStore,
    options: ExecutorOptions,
    metrics: TraversalMetrics,
}

impl<'a> QueryExecutor<'a> {
    /// Build an executor with its own HTTP client.
    pub fn new(store: &'a ResourceStore, options: ExecutorOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .build()?;
        Ok(Self::with_client(client, store, options))
    }

    /// Build an executor around an existing client. The client's own
    /// timeouts apply; `options` only drives retries and paging.
    pub fn with_client(client: Client, store: &'a ResourceStore, options: ExecutorOptions) -> Self {
        Self {
            client,
            store,
            options,
            metrics: TraversalMetrics::new(),
        }
    }

    pub fn store(&self) -> &'a ResourceStore {
        self.store
    }

    pub fn metrics(&self) -> &TraversalMetrics {
        &self.metrics
    }

    /// Run one logical query to completion, following `next` links.
    ///
    /// Every returned resource has already been inserted into the store
    /// (resources that were stored before are returned too).
    pub async fn execute(&self, query_url: &str) -> Result<Vec<Resource>> {
        self.metrics.record_query();

        let mut resources = Vec::new();
        let mut fetched: HashSet<String> = HashSet::new();
        let mut next = Some(query_url.to_string());

        while let Some(url) = next.take() {
            if fetched.len() >= self.options.max_pages {
                return Err(FhirGraphError::Pagination(format!(
                    "{query_url} still advertises a next page after {} pages",
                    self.options.max_pages
                )));
            }
            if !fetched.insert(url.clone()) {
                return Err(FhirGraphError::Pagination(format!(
                    "next link {url} points at a page already fetched for {query_url}"
                )));
            }

            let Some(bundle) = self.fetch_page_with_retry(&url).await? else {
                break;
            };
            next = bundle.next_url().map(str::to_string);
            self.metrics.record_page(bundle.entry.len());
            self.store_page(bundle, &mut resources)?;
        }

        Ok(resources)
    }

    /// GET a single JSON document (no paging, no retries).
    pub async fn get_json(&self, url: &str) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, FHIR_JSON)
            .send()
            .await
            .map_err(|e| classify(url, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FhirGraphError::Status {
                url: url.to_string(),
                status,
            });
        }
        response.json::<Value>().await.map_err(|e| classify(url, e))
    }

    // -------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------

    /// `Ok(None)` means the retry budget ran out on timeouts.
    async fn fetch_page_with_retry(&self, url: &str) -> Result<Option<Bundle>> {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.fetch_page(url).await {
                Ok(bundle) => return Ok(Some(bundle)),
                Err(e) if e.is_transient() => {
                    if attempt >= max_attempts {
                        warn!(
                            url,
                            attempts = attempt,
                            "giving up after repeated timeouts, continuing without this page"
                        );
                        self.metrics.record_gave_up();
                        return Ok(None);
                    }
                    warn!(
                        url,
                        attempt,
                        max_attempts,
                        delay_ms = self.options.retry_delay.as_millis() as u64,
                        "request timed out, retrying"
                    );
                    self.metrics.record_retry();
                    tokio::time::sleep(self.options.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_page(&self, url: &str) -> Result<Bundle> {
        debug!(url, "querying");
        let response = self
            .client
            .get(url)
            .header(ACCEPT, FHIR_JSON)
            .send()
            .await
            .map_err(|e| classify(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FhirGraphError::Status {
                url: url.to_string(),
                status,
            });
        }
        response.json::<Bundle>().await.map_err(|e| classify(url, e))
    }

    fn store_page(&self, bundle: Bundle, out: &mut Vec<Resource>) -> Result<()> {
        for document in bundle.into_resources() {
            let resource = match Resource::from_document(document) {
                Ok(r) => r,
                Err(e) => {
                    warn!(error = %e, "skipping malformed resource in search results");
                    self.metrics.record_invalid();
                    continue;
                }
            };
            match self.store.insert(&resource)? {
                InsertOutcome::Inserted => self.metrics.record_inserted(),
                InsertOutcome::Duplicate => self.metrics.record_duplicate(),
            }
            out.push(resource);
        }
        Ok(())
    }
}

/// Timeouts become retryable [`FhirGraphError::Timeout`]s, everything else
/// stays a fatal [`FhirGraphError::Http`].
fn classify(url: &str, err: reqwest::Error) -> FhirGraphError {
    if err.is_timeout() {
        FhirGraphError::Timeout {
            url: url.to_string(),
            source: err,
        }
    } else {
        FhirGraphError::Http(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
