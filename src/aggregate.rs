//! Per-type rollup of everything in the store.
//!
//! For each resource type: how many resources are stored, and how many
//! `reference` strings inside them point at each other resource type.

use serde_json::Value;

use crate::error::Result;
use crate::store::ResourceStore;
use crate::types::{AggregateSummary, ReferenceCount, TypeSummary};

pub struct Aggregator<'a> {
    store: &'a ResourceStore,
}

impl<'a> Aggregator<'a> {
    pub fn new(store: &'a ResourceStore) -> Self {
        Self { store }
    }

    /// Build the summary. Read-only; the store is not modified.
    pub fn summarize(&self) -> Result<AggregateSummary> {
        let mut summary = AggregateSummary::new();
        for resource_type in self.store.counts_by_type()?.into_keys() {
            let resources = self.store.list_by_type(&resource_type)?;
            let entry: &mut TypeSummary = summary.entry(resource_type).or_default();

            for resource in &resources {
                entry.count += 1;
                let mut refs = Vec::new();
                collect_references(resource.document(), &mut refs);
                for target in refs.into_iter().filter_map(reference_type) {
                    entry
                        .references
                        .entry(target.to_string())
                        .or_insert_with(ReferenceCount::default)
                        .count += 1;
                }
            }
        }
        Ok(summary)
    }
}

/// Every string stored under a `reference` key, at any depth.
///
/// A `reference` holding an object or array (CodeableReference) is searched
/// further instead of being counted itself.
pub fn collect_references<'v>(value: &'v Value, out: &mut Vec<&'v str>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match child {
                    Value::String(s) if key == "reference" => out.push(s.as_str()),
                    _ => collect_references(child, out),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        _ => {}
    }
}

/// Resource type named by a reference string.
///
/// Handles `Type/id`, absolute `http://host/fhir/Type/id` and
/// `Type/id/_history/n`. Contained (`#x`) and `urn:` references have no type
/// and yield `None`.
pub fn reference_type(reference: &str) -> Option<&str> {
    let reference = reference.trim();
    if !reference.contains('/') {
        return None;
    }
    let path = match reference.find("/_history") {
        Some(pos) => &reference[..pos],
        None => reference,
    };
    let mut segments = path.rsplit('/');
    let _id = segments.next().filter(|id| !id.is_empty())?;
    let resource_type = segments.next()?;
    resource_type
        .chars()
        .next()
        .filter(char::is_ascii_uppercase)
        .map(|_| resource_type)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
