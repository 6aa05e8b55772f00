//! GraphDefinition traversal.
//!
//! Walks the links of a [`GraphDefinition`] depth-first, starting from the
//! resources returned by a root query. For every link it pulls join keys out
//! of the frontier resources, batches them into search queries, runs the
//! queries through the [`QueryExecutor`] and then descends into the target
//! type using everything the store now holds for it.
//!
//! The walk uses an explicit stack of frames instead of recursion. Each
//! frame owns its frontier; the Visit Record set is owned by the run and
//! only touched between awaits.
//!
//! # Termination
//!
//! A `(sourceType, sourceId, targetType)` triple is processed at most once
//! per run. After every link step the target type is read back from the
//! store and expanded, unless a frame with exactly that stored set was
//! already expanded. The store is append-only, so a type's stored set is
//! identified by its row count and only grows; cyclic definitions stop once
//! no link adds anything new.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::config::TraversalConfig;
use crate::error::Result;
use crate::graph::definition::{GraphDefinition, Link};
use crate::graph::path::JoinPath;
use crate::observability::MetricsSnapshot;
use crate::progress::ProgressReporter;
use crate::query::QueryExecutor;
use crate::store::ResourceStore;
use crate::types::{Resource, VisitRecord};

// ---------------------------------------------------------------------------
// Options & report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraversalOptions {
    /// Join-key values per query.
    pub chunk_size: usize,
    /// Chunk queries awaited together.
    pub max_concurrency: usize,
}

impl Default for TraversalOptions {
    fn default() -> Self {
        Self::from(&TraversalConfig::default())
    }
}

impl From<&TraversalConfig> for TraversalOptions {
    fn from(config: &TraversalConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            max_concurrency: config.max_concurrency,
        }
    }
}

/// Summary of a finished run. The fetched data itself lives in the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraversalReport {
    /// Link steps taken, counting each revisit of a link.
    pub links_processed: usize,
    /// Link steps that found no join keys and issued nothing.
    pub links_without_keys: usize,
    /// Chunk queries dispatched (excluding the root query).
    pub chunk_queries: usize,
    /// Distinct Visit Records recorded.
    pub visits: usize,
    /// Stored resources per type at the end of the run.
    pub counts: BTreeMap<String, usize>,
    pub metrics: MetricsSnapshot,
}

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

/// One search URL per `chunk_size` join keys:
/// `{base_url}/{targetId}?{params with {path} replaced}`.
pub fn build_chunk_queries(
    base_url: &str,
    link: &Link,
    values: &[String],
    chunk_size: usize,
) -> Vec<String> {
    values
        .chunks(chunk_size.max(1))
        .filter_map(|chunk| link.render_params(chunk))
        .map(|params| format!("{base_url}/{}?{params}", link.target_id))
        .collect()
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Work-stack entry: a frontier and the links leaving its type still to run.
struct Frame {
    frontier_type: String,
    resources: Vec<Resource>,
    links: Vec<usize>,
    next: usize,
}

struct LinkStep {
    new_visits: usize,
    queries: usize,
}

pub struct TraversalEngine<'a> {
    executor: &'a QueryExecutor<'a>,
    base_url: String,
    options: TraversalOptions,
    reporter: Option<&'a dyn ProgressReporter>,
}

impl<'a> TraversalEngine<'a> {
    pub fn new(executor: &'a QueryExecutor<'a>, base_url: &str, options: TraversalOptions) -> Self {
        Self {
            executor,
            base_url: crate::config::normalize_base_url(base_url),
            options,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: &'a dyn ProgressReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    fn store(&self) -> &'a ResourceStore {
        self.executor.store()
    }

    /// Absolute URL for a root query given as `/Type?params`, `Type?params`
    /// or a full URL.
    pub fn root_url(&self, query: &str) -> String {
        if query.starts_with("http://") || query.starts_with("https://") {
            query.to_string()
        } else if query.starts_with('/') {
            format!("{}{query}", self.base_url)
        } else {
            format!("{}/{query}", self.base_url)
        }
    }

    /// Traverse `graph` starting from the results of `starting_query`.
    ///
    /// The first link's `sourceId` is the starting type. Everything fetched
    /// is written to the store; a fatal query error aborts the run and
    /// leaves what was already stored in place.
    pub async fn run(
        &self,
        graph: &GraphDefinition,
        starting_query: Option<&str>,
    ) -> Result<TraversalReport> {
        graph.validate()?;
        let start_type = graph.start_type()?.to_string();
        let paths: Vec<Option<JoinPath>> = graph
            .link
            .iter()
            .map(Link::join_path)
            .collect::<Result<_>>()?;

        let frontier = match starting_query.filter(|q| !q.trim().is_empty()) {
            Some(q) => {
                let url = self.root_url(q);
                info!(url = %url, "running root query");
                self.executor.execute(&url).await?
            }
            None => Vec::new(),
        };
        info!(
            start_type = %start_type,
            resources = frontier.len(),
            "starting traversal"
        );

        let mut report = TraversalReport::default();
        let mut visited: HashSet<VisitRecord> = HashSet::new();
        let mut expanded: HashSet<(String, usize)> = HashSet::new();
        let mut stack = vec![Frame {
            links: graph.links_from(&start_type).map(|(i, _)| i).collect(),
            frontier_type: start_type,
            resources: frontier,
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(&index) = frame.links.get(frame.next) else {
                stack.pop();
                continue;
            };
            frame.next += 1;

            let link = &graph.link[index];
            debug!(
                frontier = %frame.frontier_type,
                source = %link.source_id,
                target = %link.target_id,
                "processing link"
            );
            let step = self
                .process_link(link, paths[index].as_ref(), &frame.resources, &mut visited)
                .await?;

            report.links_processed += 1;
            report.chunk_queries += step.queries;
            if link.is_query() && step.queries == 0 {
                report.links_without_keys += 1;
            }
            debug!(
                new_visits = step.new_visits,
                queries = step.queries,
                counts = ?self.store().counts_by_type()?,
                "link processed"
            );

            if !graph.has_links_from(&link.target_id) {
                continue;
            }
            let resources = self.store().list_by_type(&link.target_id)?;
            if expanded.insert((link.target_id.clone(), resources.len())) {
                stack.push(Frame {
                    links: graph.links_from(&link.target_id).map(|(i, _)| i).collect(),
                    frontier_type: link.target_id.clone(),
                    resources,
                    next: 0,
                });
            } else {
                debug!(
                    target = %link.target_id,
                    resources = resources.len(),
                    "target already expanded with these resources"
                );
            }
        }

        report.visits = visited.len();
        report.counts = self.store().counts_by_type()?;
        report.metrics = self.executor.metrics().snapshot();
        info!(
            links = report.links_processed,
            queries = report.chunk_queries,
            gave_up = report.metrics.queries_gave_up,
            metrics = %self.executor.metrics().to_json(),
            "traversal complete"
        );
        Ok(report)
    }

    /// Mark visits, collect join keys and run the chunk queries for one link.
    async fn process_link(
        &self,
        link: &Link,
        path: Option<&JoinPath>,
        frontier: &[Resource],
        visited: &mut HashSet<VisitRecord>,
    ) -> Result<LinkStep> {
        let mut new_visits = 0;
        let mut candidates: BTreeSet<String> = BTreeSet::new();

        for resource in frontier.iter().filter(|r| r.resource_type() == link.source_id) {
            let record = VisitRecord::new(&link.source_id, resource.id(), &link.target_id);
            if !visited.insert(record) {
                continue;
            }
            new_visits += 1;

            if let Some(path) = path {
                match path.join_key(resource, &link.source_id) {
                    Some(key) => {
                        candidates.insert(key);
                    }
                    None => debug!(path = %path, resource = %resource.key(), "no join key"),
                }
            }
        }

        if !link.is_query() {
            debug!(
                target = %link.target_id,
                "link has no params, continuing with cached resources"
            );
            return Ok(LinkStep {
                new_visits,
                queries: 0,
            });
        }

        if candidates.is_empty() {
            info!(
                source = %link.source_id,
                target = %link.target_id,
                "no join keys found, skipping queries"
            );
            return Ok(LinkStep {
                new_visits,
                queries: 0,
            });
        }

        let label = format!(
            "{}/{} with {} {}(s)",
            link.target_id,
            link.params.as_deref().unwrap_or_default(),
            candidates.len(),
            link.source_id
        );
        if let Some(reporter) = self.reporter {
            reporter.start(&format!("Processing link: {label}"));
        }

        let values: Vec<String> = candidates.into_iter().collect();
        let queries = self.dispatch(link, &values).await?;

        if let Some(reporter) = self.reporter {
            reporter.finish(&format!("Processed link: {label}"));
        }
        Ok(LinkStep {
            new_visits,
            queries,
        })
    }

    /// Run the chunk queries, `max_concurrency` at a time. Each batch is
    /// fully awaited before the next starts and before the caller reads the
    /// target type back from the store.
    async fn dispatch(&self, link: &Link, values: &[String]) -> Result<usize> {
        let urls = build_chunk_queries(&self.base_url, link, values, self.options.chunk_size);
        info!(
            target = %link.target_id,
            keys = values.len(),
            chunks = urls.len(),
            "dispatching queries"
        );

        for batch in urls.chunks(self.options.max_concurrency.max(1)) {
            try_join_all(batch.iter().map(|url| {
                self.executor.metrics().record_chunk();
                self.executor.execute(url)
            }))
            .await?;
        }
        Ok(urls.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn specimen_link() -> Link {
        Link {
            source_id: "Patient".into(),
            target_id: "Specimen".into(),
            path: Some("Patient.id".into()),
            params: Some("subject={path}&_count=1000".into()),
            description: None,
        }
    }

    fn values(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("Patient/{i}")).collect()
    }

    fn keys_in(url: &str) -> Vec<String> {
        let query = url.split_once("subject=").unwrap().1;
        let joined = query.split('&').next().unwrap();
        joined.split(',').map(str::to_string).collect()
    }

    #[test]
    fn chunks_120_values_into_3_queries() {
        let vals = values(120);
        let urls = build_chunk_queries("http://fhir", &specimen_link(), &vals, 50);
        assert_eq!(urls.len(), 3);

        let sizes: Vec<usize> = urls.iter().map(|u| keys_in(u).len()).collect();
        assert_eq!(sizes, vec![50, 50, 20]);

        let mut seen: Vec<String> = urls.iter().flat_map(|u| keys_in(u)).collect();
        seen.sort();
        let mut expected = vals.clone();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn small_value_set_is_one_query() {
        let urls = build_chunk_queries("http://fhir", &specimen_link(), &values(3), 50);
        assert_eq!(
            urls,
            vec!["http://fhir/Specimen?subject=Patient/0,Patient/1,Patient/2&_count=1000"]
        );
    }

    #[test]
    fn no_values_no_queries() {
        assert!(build_chunk_queries("http://fhir", &specimen_link(), &[], 50).is_empty());
    }

    #[test]
    fn pass_through_link_builds_nothing() {
        let link = Link {
            params: None,
            ..specimen_link()
        };
        assert!(build_chunk_queries("http://fhir", &link, &values(5), 50).is_empty());
    }

    #[test]
    fn options_follow_config() {
        let config = TraversalConfig {
            chunk_size: 7,
            max_concurrency: 2,
        };
        let options = TraversalOptions::from(&config);
        assert_eq!(options.chunk_size, 7);
        assert_eq!(options.max_concurrency, 2);
        assert_eq!(TraversalOptions::default().chunk_size, 50);
    }

    #[test]
    fn root_url_accepts_relative_and_absolute() {
        let store = ResourceStore::in_memory().unwrap();
        let executor = QueryExecutor::new(&store, Default::default()).unwrap();
        let engine = TraversalEngine::new(&executor, "http://fhir/", TraversalOptions::default());
        assert_eq!(
            engine.root_url("/ResearchStudy?identifier=X"),
            "http://fhir/ResearchStudy?identifier=X"
        );
        assert_eq!(engine.root_url("Patient"), "http://fhir/Patient");
        assert_eq!(
            engine.root_url("https://other/Patient?_id=1"),
            "https://other/Patient?_id=1"
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn chunking_covers_every_value_once(n in 0usize..400, size in 1usize..80) {
            let vals = values(n);
            let urls = build_chunk_queries("http://fhir", &specimen_link(), &vals, size);
            prop_assert_eq!(urls.len(), n.div_ceil(size));

            let seen: Vec<String> = urls.iter().flat_map(|u| keys_in(u)).collect();
            prop_assert_eq!(seen, vals);
            for u in &urls {
                prop_assert!(keys_in(u).len() <= size);
            }
        }
    }
}
