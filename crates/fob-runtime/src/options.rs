use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Behavior of `require` for an id with no registration and no external.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingModulePolicy {
    /// Fail with `ModuleNotRegistered`.
    #[default]
    Error,
    /// Log a warning and hand back an empty exports object.
    Empty,
}

/// Options a bundle passes to its runtime at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeOptions {
    /// Prefix joined with a module's resource pot to build `meta.url`.
    pub public_path: String,
    pub missing_module: MissingModulePolicy,
    /// Exposed to modules as `meta.env`.
    pub env: IndexMap<String, String>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            public_path: "/".to_string(),
            missing_module: MissingModulePolicy::default(),
            env: IndexMap::new(),
        }
    }
}

impl RuntimeOptions {
    pub fn with_public_path(mut self, public_path: impl Into<String>) -> Self {
        self.public_path = public_path.into();
        self
    }

    pub fn with_missing_module(mut self, policy: MissingModulePolicy) -> Self {
        self.missing_module = policy;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Join `public_path` and `resource` with exactly one separator.
    pub fn resource_url(&self, resource: &str) -> String {
        let base = self.public_path.trim_end_matches('/');
        let resource = resource.trim_start_matches('/');
        format!("{base}/{resource}")
    }
}
