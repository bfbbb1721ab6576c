//! HMR update payload and the envelope broadcast to connected clients.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resource::DynamicResourceMap;

/// Result of one successful recompilation cycle.
///
/// Built once per compiled batch and never mutated afterwards; the
/// coordinator shares it behind an `Arc` with every client it is sent to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HmrUpdateResult {
    /// Modules that did not exist in the previous build
    #[serde(default)]
    pub added: Vec<String>,
    /// Modules whose code changed
    #[serde(default)]
    pub changed: Vec<String>,
    /// Modules no longer part of the graph
    #[serde(default)]
    pub removed: Vec<String>,
    /// Changed module -> modules that accept its update
    #[serde(default)]
    pub boundaries: IndexMap<String, Vec<String>>,
    /// Generated code for updated modules from immutable (vendor) sources
    #[serde(default)]
    pub immutable_modules: String,
    /// Generated code for updated modules from mutable (project) sources
    #[serde(default)]
    pub mutable_modules: String,
    /// Complete replacement for the client's dynamic resource map
    #[serde(default)]
    pub dynamic_resources_map: DynamicResourceMap,
}

impl HmrUpdateResult {
    /// True when the compile produced no module-level change.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }

    /// Boundaries recorded for a changed module.
    pub fn boundaries_of(&self, id: &str) -> &[String] {
        self.boundaries.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Envelope pushed to every connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HmrMessage {
    /// A batch compiled successfully
    Update { result: HmrUpdateResult },

    /// A batch failed after exhausting its retries
    Error { message: String, overlay: bool },
}

impl HmrMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, HmrMessage::Error { .. })
    }
}
