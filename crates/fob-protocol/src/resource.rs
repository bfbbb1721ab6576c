//! Resources loaded on behalf of dynamically imported modules.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Kind of a loadable resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Executable script; registers the modules it contains when run
    Script,
    /// Stylesheet or other `<link>` side-load; inert for the module graph
    Link,
}

/// A single file emitted by the compiler (chunk or stylesheet).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    /// URL path relative to the public path (e.g. "chunk-a1b2.js")
    pub path: String,
    /// Resource kind
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
}

impl Resource {
    pub fn script(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            resource_type: ResourceType::Script,
        }
    }

    pub fn link(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            resource_type: ResourceType::Link,
        }
    }

    pub fn is_script(&self) -> bool {
        self.resource_type == ResourceType::Script
    }
}

/// Dynamic module id -> resources to load, in order, before its exports exist.
pub type DynamicResourceMap = IndexMap<String, Vec<Resource>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_wire_format() {
        let json = serde_json::to_string(&Resource::script("a.js")).unwrap();
        assert_eq!(json, r#"{"path":"a.js","type":"script"}"#);

        let link: Resource = serde_json::from_str(r#"{"path":"a.css","type":"link"}"#).unwrap();
        assert_eq!(link, Resource::link("a.css"));
        assert!(!link.is_script());
    }
}
