//! Join-key path expressions.
//!
//! A link's `path` names a value inside a source resource, rooted at the
//! resource type: `ResearchStudy.id`, `Specimen.subject.reference`,
//! `Patient.identifier.0.value` or `Patient.identifier[0].value`.
//! Evaluation distinguishes a path that leads nowhere from one that leads
//! to an explicit `null`.

use std::fmt;

use serde_json::Value;

use crate::error::{FhirGraphError, Result};
use crate::types::Resource;

/// One step of a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object field, or array position when the current value is an array
    /// and the name is numeric.
    Key(String),
    /// Explicit `[n]` array position.
    Index(usize),
}

/// Outcome of evaluating a path against a document.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    /// Some step of the path does not exist.
    Missing,
    /// The path exists and holds `null`.
    Null,
    Found(&'a Value),
}

/// A parsed path expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinPath {
    raw: String,
    root: String,
    segments: Vec<Segment>,
}

impl JoinPath {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(FhirGraphError::GraphDefinition("empty path".into()));
        }

        let mut parts = Vec::new();
        for part in raw.split('.') {
            parse_part(raw, part, &mut parts)?;
        }

        let root = match parts.first() {
            Some(Segment::Key(k)) => k.clone(),
            _ => {
                return Err(FhirGraphError::GraphDefinition(format!(
                    "path '{raw}' must start with a resource type"
                )))
            }
        };
        parts.remove(0);

        Ok(Self {
            raw: raw.to_string(),
            root,
            segments: parts,
        })
    }

    /// Resource type the path is rooted at.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the path ends in a bare `id` field, whose values need the
    /// `Type/` prefix to match reference-style search parameters.
    pub fn ends_with_id(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::Key(k)) if k == "id")
    }

    /// Evaluate against a full resource document.
    pub fn evaluate<'a>(&self, resource: &'a Resource) -> Lookup<'a> {
        if resource.resource_type() != self.root {
            return Lookup::Missing;
        }
        self.evaluate_value(resource.document())
    }

    /// Evaluate the segments after the root against an arbitrary value.
    pub fn evaluate_value<'a>(&self, document: &'a Value) -> Lookup<'a> {
        let mut current = document;
        for segment in &self.segments {
            let next = match (segment, current) {
                (Segment::Key(k), Value::Object(map)) => map.get(k),
                (Segment::Key(k), Value::Array(items)) => {
                    k.parse::<usize>().ok().and_then(|i| items.get(i))
                }
                (Segment::Index(i), Value::Array(items)) => items.get(*i),
                _ => None,
            };
            match next {
                Some(v) => current = v,
                None => return Lookup::Missing,
            }
        }
        if current.is_null() {
            Lookup::Null
        } else {
            Lookup::Found(current)
        }
    }

    /// The join-key string this path yields for `resource`, if any.
    ///
    /// Strings and numbers qualify; objects, arrays, booleans and nulls do
    /// not. Values of `*.id` paths are prefixed with `{source_type}/`.
    pub fn join_key(&self, resource: &Resource, source_type: &str) -> Option<String> {
        let value = match self.evaluate(resource) {
            Lookup::Found(Value::String(s)) if !s.is_empty() => s.clone(),
            Lookup::Found(Value::Number(n)) => n.to_string(),
            _ => return None,
        };
        if self.ends_with_id() {
            Some(format!("{source_type}/{value}"))
        } else {
            Some(value)
        }
    }
}

impl fmt::Display for JoinPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split `name[0][1]` into a key followed by indices.
fn parse_part(raw: &str, part: &str, out: &mut Vec<Segment>) -> Result<()> {
    let bad = || FhirGraphError::GraphDefinition(format!("malformed path '{raw}'"));

    let (name, mut rest) = match part.find('[') {
        Some(pos) => (&part[..pos], &part[pos..]),
        None => (part, ""),
    };
    if name.is_empty() && rest.is_empty() {
        return Err(bad());
    }
    if !name.is_empty() {
        out.push(Segment::Key(name.to_string()));
    }
    while !rest.is_empty() {
        let close = rest.find(']').ok_or_else(bad)?;
        if !rest.starts_with('[') {
            return Err(bad());
        }
        let index = rest[1..close].trim().parse::<usize>().map_err(|_| bad())?;
        out.push(Segment::Index(index));
        rest = &rest[close + 1..];
    }
    Ok(())
}
