//! FHIR `GraphDefinition` documents: the links a traversal follows.
//!
//! Only the parts the traversal needs are modelled. Each link names a
//! source and target resource type, an optional join-key `path` into the
//! source resource and an optional `params` search template containing the
//! `{path}` placeholder. A link without `params` just continues into
//! whatever is already cached for its target type.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FhirGraphError, Result};
use crate::graph::path::JoinPath;
use crate::query::QueryExecutor;

/// Placeholder in `params` replaced by comma-joined join-key values.
pub const PATH_PLACEHOLDER: &str = "{path}";

// ---------------------------------------------------------------------------
// Link
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    #[serde(default)]
    pub source_id: String,
    #[serde(default)]
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Link {
    /// Whether this link issues queries (as opposed to passing through).
    pub fn is_query(&self) -> bool {
        self.params.is_some()
    }

    /// Parsed `path`, if the link has one.
    pub fn join_path(&self) -> Result<Option<JoinPath>> {
        self.path.as_deref().map(JoinPath::parse).transpose()
    }

    /// `params` with the placeholder replaced by `values` joined with commas.
    pub fn render_params(&self, values: &[String]) -> Option<String> {
        self.params
            .as_ref()
            .map(|p| p.replace(PATH_PLACEHOLDER, &values.join(",")))
    }
}

// ---------------------------------------------------------------------------
// GraphDefinition
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub link: Vec<Link>,
}

impl GraphDefinition {
    pub fn new(links: Vec<Link>) -> Self {
        Self {
            resource_type: Some("GraphDefinition".into()),
            link: links,
            ..Self::default()
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let def: GraphDefinition = serde_json::from_value(value)?;
        def.validate()?;
        Ok(def)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let def: GraphDefinition = serde_json::from_str(text)?;
        def.validate()?;
        Ok(def)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let def: GraphDefinition = serde_yaml::from_str(text)?;
        def.validate()?;
        Ok(def)
    }

    /// Load a `.json`, `.yaml` or `.yml` file.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&text),
            _ => Self::from_json(&text),
        }
    }

    /// Fetch `{base_url}/GraphDefinition/{id}` from the server.
    pub async fn fetch(executor: &QueryExecutor<'_>, base_url: &str, id: &str) -> Result<Self> {
        let url = format!("{base_url}/GraphDefinition/{id}");
        let value = executor.get_json(&url).await?;
        Self::from_value(value)
    }

    /// Human-readable name for progress output.
    pub fn label(&self) -> &str {
        self.id
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("graph-definition")
    }

    /// Resource type the traversal starts from: the first link's source.
    pub fn start_type(&self) -> Result<&str> {
        self.link
            .first()
            .map(|l| l.source_id.as_str())
            .ok_or_else(|| FhirGraphError::GraphDefinition("no links".into()))
    }

    /// Links leaving `source_type`, with their position in the definition.
    pub fn links_from<'a>(
        &'a self,
        source_type: &'a str,
    ) -> impl Iterator<Item = (usize, &'a Link)> + 'a {
        self.link
            .iter()
            .enumerate()
            .filter(move |(_, l)| l.source_id == source_type)
    }

    pub fn has_links_from(&self, source_type: &str) -> bool {
        self.link.iter().any(|l| l.source_id == source_type)
    }

    /// Check the definition can drive a traversal.
    pub fn validate(&self) -> Result<()> {
        if let Some(rt) = self.resource_type.as_deref() {
            if rt != "GraphDefinition" {
                return Err(FhirGraphError::GraphDefinition(format!(
                    "expected resourceType GraphDefinition, got {rt}"
                )));
            }
        }
        if self.link.is_empty() {
            return Err(FhirGraphError::GraphDefinition("no links".into()));
        }
        for (i, link) in self.link.iter().enumerate() {
            let bad = |msg: &str| {
                Err(FhirGraphError::GraphDefinition(format!("link[{i}]: {msg}")))
            };
            if link.source_id.trim().is_empty() {
                return bad("sourceId is required");
            }
            if link.target_id.trim().is_empty() {
                return bad("targetId is required");
            }
            if let Some(params) = &link.params {
                if link.path.is_none() {
                    return bad("a link with params needs a path");
                }
                if !params.contains(PATH_PLACEHOLDER) {
                    return bad("params must contain the {path} placeholder");
                }
            }
            if let Some(path) = link.join_path()? {
                if path.root() != link.source_id {
                    return bad(&format!(
                        "path '{path}' must start with its source type {}",
                        link.source_id
                    ));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GraphDefinitionSource
// ---------------------------------------------------------------------------

/// Where a graph definition named on the command line comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphDefinitionSource {
    File(PathBuf),
    ServerId(String),
}

impl GraphDefinitionSource {
    /// An existing file path is a file; anything else is a server-side id.
    pub fn resolve(name: &str) -> Self {
        let path = PathBuf::from(name);
        if path.is_file() {
            Self::File(path)
        } else {
            Self::ServerId(name.to_string())
        }
    }

    pub async fn load(&self, executor: &QueryExecutor<'_>, base_url: &str) -> Result<GraphDefinition> {
        match self {
            Self::File(path) => GraphDefinition::from_path(path),
            Self::ServerId(id) => GraphDefinition::fetch(executor, base_url, id).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
