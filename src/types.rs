//! Core domain types for fhir-graph.
//!
//! Resources are kept as opaque JSON documents. Only `resourceType` and `id`
//! are interpreted here; everything else belongs to whoever reads the store.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FhirGraphError, Result};

// ---------------------------------------------------------------------------
// ResourceKey
// ---------------------------------------------------------------------------

/// Identity of a stored resource: `(id, resourceType)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub id: String,
    pub resource_type: String,
}

impl ResourceKey {
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
        }
    }

    /// Reference-style rendering, e.g. `Patient/123`.
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.resource_type, self.id)
    }
}

// ---------------------------------------------------------------------------
// Resource
// ---------------------------------------------------------------------------

/// A fetched FHIR resource: its key plus the untouched JSON document.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    key: ResourceKey,
    document: Value,
}

impl Resource {
    /// Validate `document` and wrap it.
    ///
    /// Fails with [`FhirGraphError::Validation`] unless the document is an
    /// object carrying non-empty string `id` and `resourceType` fields.
    pub fn from_document(document: Value) -> Result<Self> {
        let obj = document.as_object().ok_or_else(|| {
            FhirGraphError::Validation("resource must be a JSON object".into())
        })?;
        let resource_type = required_str(obj, "resourceType")?;
        let id = required_str(obj, "id")?;
        Ok(Self {
            key: ResourceKey::new(resource_type, id),
            document,
        })
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn id(&self) -> &str {
        &self.key.id
    }

    pub fn resource_type(&self) -> &str {
        &self.key.resource_type
    }

    pub fn document(&self) -> &Value {
        &self.document
    }
}

fn required_str(obj: &serde_json::Map<String, Value>, field: &str) -> Result<String> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(_) => Err(FhirGraphError::Validation(format!(
            "resource field '{field}' must be a non-empty string"
        ))),
        None => Err(FhirGraphError::Validation(format!(
            "resource must contain '{field}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// InsertOutcome
// ---------------------------------------------------------------------------

/// Result of an idempotent insert. A duplicate key is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

// ---------------------------------------------------------------------------
// VisitRecord
// ---------------------------------------------------------------------------

/// Marks a `(sourceType, sourceId, targetType)` link instance as processed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VisitRecord {
    pub source_type: String,
    pub source_id: String,
    pub target_type: String,
}

impl VisitRecord {
    pub fn new(source_type: &str, source_id: &str, target_type: &str) -> Self {
        Self {
            source_type: source_type.to_string(),
            source_id: source_id.to_string(),
            target_type: target_type.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate summary
// ---------------------------------------------------------------------------

/// Per-type rollup: `{type: {count, references: {type: {count}}}}`.
pub type AggregateSummary = BTreeMap<String, TypeSummary>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSummary {
    pub count: usize,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub references: BTreeMap<String, ReferenceCount>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCount {
    pub count: usize,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
