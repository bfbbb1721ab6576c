//! Development server configuration types.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub open_browser: bool,

    #[serde(default)]
    pub hmr: HmrConfig,

    #[serde(default)]
    pub lazy_compilation: LazyCompilationConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            open_browser: false,
            hmr: HmrConfig::default(),
            lazy_compilation: LazyCompilationConfig::default(),
            watch: WatchConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl DevConfig {
    /// Base URL clients connect to.
    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HmrConfig {
    /// Route of the server-sent event stream
    #[serde(default = "default_hmr_path")]
    pub path: String,

    /// Extra compile attempts for a failing batch before an error is broadcast
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Ask clients to render compile errors as an overlay
    #[serde(default = "default_true")]
    pub overlay: bool,
}

impl Default for HmrConfig {
    fn default() -> Self {
        Self {
            path: default_hmr_path(),
            max_retries: default_max_retries(),
            overlay: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LazyCompilationConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_lazy_path")]
    pub path: String,

    /// Bundle targets Node rather than the browser
    #[serde(default)]
    pub node: bool,
}

impl Default for LazyCompilationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_lazy_path(),
            node: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// Directory names or `*.ext` patterns that never trigger updates
    #[serde(default = "default_ignore")]
    pub ignore: Vec<String>,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            ignore: default_ignore(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Behavior of the in-bundle runtime when a required module is missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingModule {
    #[default]
    Error,
    Empty,
}

/// Options injected into the bundle for its module runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_public_path")]
    pub public_path: String,

    #[serde(default)]
    pub missing_module: MissingModule,

    #[serde(default)]
    pub env: IndexMap<String, String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            public_path: default_public_path(),
            missing_module: MissingModule::default(),
            env: IndexMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// The camelCase object the runtime reads at startup.
    pub fn to_runtime_json(&self) -> serde_json::Value {
        serde_json::json!({
            "publicPath": self.public_path,
            "missingModule": self.missing_module,
            "env": self.env,
        })
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_hmr_path() -> String {
    "/__hmr".into()
}

fn default_max_retries() -> u32 {
    2
}

fn default_lazy_path() -> String {
    "/__lazy_compile".into()
}

fn default_ignore() -> Vec<String> {
    ["node_modules", ".git", "dist", "build"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_debounce_ms() -> u64 {
    100
}

fn default_public_path() -> String {
    "/".into()
}
