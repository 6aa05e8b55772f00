//! The slice of a FHIR search `Bundle` the executor cares about.

use serde::Deserialize;
use serde_json::Value;

/// One page of search results.
///
/// Only `entry[].resource` and `link[]` are read; anything else the server
/// sends is ignored. A response that is not a Bundle at all parses as an
/// empty page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Bundle {
    #[serde(default)]
    pub entry: Vec<BundleEntry>,
    #[serde(default)]
    pub link: Vec<BundleLink>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleEntry {
    #[serde(default)]
    pub resource: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BundleLink {
    #[serde(default)]
    pub relation: String,
    #[serde(default)]
    pub url: String,
}

impl Bundle {
    /// URL of the following page, if the server advertises one.
    pub fn next_url(&self) -> Option<&str> {
        self.link
            .iter()
            .find(|l| l.relation == "next" && !l.url.is_empty())
            .map(|l| l.url.as_str())
    }

    /// Consume the page, yielding the resource documents in entry order.
    pub fn into_resources(self) -> impl Iterator<Item = Value> {
        self.entry.into_iter().filter_map(|e| e.resource)
    }
}
