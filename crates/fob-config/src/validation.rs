//! Schema checks applied after loading.

use crate::dev::DevConfig;
use crate::error::{ConfigError, Result};

/// Upper bound for `hmr.max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

impl DevConfig {
    /// Reject values the dev server cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::invalid("host", "host cannot be empty"));
        }

        if self.port == 0 {
            return Err(ConfigError::invalid(
                "port",
                "use a fixed port between 1 and 65535",
            ));
        }

        validate_route("hmr.path", &self.hmr.path)?;
        validate_route("lazy_compilation.path", &self.lazy_compilation.path)?;

        if self.hmr.path == self.lazy_compilation.path {
            return Err(ConfigError::invalid(
                "lazy_compilation.path",
                format!("conflicts with hmr.path `{}`", self.hmr.path),
            ));
        }

        if self.hmr.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::invalid(
                "hmr.max_retries",
                format!(
                    "{} is above the limit of {MAX_RETRIES_LIMIT}",
                    self.hmr.max_retries
                ),
            ));
        }

        if self.runtime.public_path.is_empty() {
            return Err(ConfigError::invalid(
                "runtime.public_path",
                "use \"/\" to serve resources from the root",
            ));
        }

        if self.watch.ignore.iter().any(|pattern| pattern.trim().is_empty()) {
            return Err(ConfigError::invalid(
                "watch.ignore",
                "remove empty strings from the ignore list",
            ));
        }

        Ok(())
    }
}

fn validate_route(field: &str, route: &str) -> Result<()> {
    if !route.starts_with('/') || route.len() < 2 {
        return Err(ConfigError::invalid(
            field,
            format!("`{route}` must be an absolute route such as \"/__hmr\""),
        ));
    }
    Ok(())
}
