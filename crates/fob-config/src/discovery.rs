//! File and environment based config loading
//!
//! Layers, lowest priority first: built-in defaults, the config file,
//! `FOB_`-prefixed environment variables. Nested keys use a double
//! underscore, so `FOB_HMR__MAX_RETRIES=5` sets `hmr.max_retries`.

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format as _, Json, Serialized, Toml},
    Figment,
};
use tracing::debug;

use crate::dev::DevConfig;
use crate::error::{ConfigError, Result};

/// Conventional config file name looked up in the project root.
pub const CONFIG_FILE: &str = "fob.toml";

/// Default prefix for environment overrides.
pub const ENV_PREFIX: &str = "FOB_";

/// Locates and loads a [`DevConfig`] for a project root.
///
/// # Example
///
/// ```no_run
/// use fob_config::ConfigDiscovery;
///
/// let config = ConfigDiscovery::new(".").load().unwrap();
/// println!("serving on {}", config.server_url());
/// ```
pub struct ConfigDiscovery {
    root: PathBuf,
    file: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigDiscovery {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            file: None,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Use an explicit config file, relative to the root unless absolute.
    /// A missing explicit file is an error rather than a fallback to defaults.
    pub fn with_file(mut self, file: impl AsRef<Path>) -> Self {
        self.file = Some(self.root.join(file));
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Resolve the config file that would be loaded.
    pub fn find(&self) -> Result<Option<PathBuf>> {
        match &self.file {
            Some(path) if path.exists() => Ok(Some(path.clone())),
            Some(path) => Err(ConfigError::NotFound(path.clone())),
            None => {
                let path = self.root.join(CONFIG_FILE);
                Ok(path.exists().then_some(path))
            }
        }
    }

    /// The layered figment, before extraction.
    pub fn figment(&self) -> Result<Figment> {
        let mut figment = Figment::new().merge(Serialized::defaults(DevConfig::default()));

        if let Some(path) = self.find()? {
            debug!(path = %path.display(), "loading config file");
            let is_json = path.extension().is_some_and(|ext| ext == "json");
            figment = if is_json {
                figment.merge(Json::file(path))
            } else {
                figment.merge(Toml::file(path))
            };
        }

        Ok(figment.merge(Env::prefixed(&self.env_prefix).split("__")))
    }

    /// Load and validate the config.
    pub fn load(&self) -> Result<DevConfig> {
        let config: DevConfig = self.figment()?.extract().map_err(|e| {
            ConfigError::invalid(
                "configuration",
                format!("{e}. Check {CONFIG_FILE} syntax and field types"),
            )
        })?;
        config.validate()?;
        Ok(config)
    }
}

impl DevConfig {
    /// Load the config for `root` using the conventional file and `FOB_` environment.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        ConfigDiscovery::new(root).load()
    }

    /// Load a config from an explicit file.
    pub fn load_from(root: impl AsRef<Path>, file: impl AsRef<Path>) -> Result<Self> {
        ConfigDiscovery::new(root).with_file(file).load()
    }
}
