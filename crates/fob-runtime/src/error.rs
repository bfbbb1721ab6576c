//! Error types for the module runtime.
//!
//! Errors are `Clone` so that one failed resource load or lazy compile can be
//! reported to every caller waiting on it.

use thiserror::Error;

pub type Result<T, E = ModuleError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    /// `register` called for an id that already has a live registration
    #[error("module \"{0}\" is already registered")]
    DuplicateRegistration(String),

    /// `require` of an id with no initializer and no external fallback
    #[error("module \"{0}\" is not registered")]
    ModuleNotRegistered(String),

    /// `dynamic_require` of an id missing from the dynamic resource map
    #[error("dynamic import \"{0}\" is not associated with any resource")]
    NoDynamicResources(String),

    #[error("failed to load resource \"{path}\": {message}")]
    ResourceLoad { path: String, message: String },

    #[error("lazy compilation of [{}] failed: {message}", .paths.join(", "))]
    LazyCompile { paths: Vec<String>, message: String },

    /// An initializer reported a failure of its own
    #[error("module \"{id}\" threw during initialization: {message}")]
    Initialization { id: String, message: String },

    #[error("failed to evaluate update code: {0}")]
    Evaluation(String),
}

impl ModuleError {
    /// Error raised by module code itself.
    pub fn thrown(id: impl Into<String>, message: impl Into<String>) -> Self {
        ModuleError::Initialization {
            id: id.into(),
            message: message.into(),
        }
    }

    /// Structural errors indicate a broken build and are never retried.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ModuleError::DuplicateRegistration(_) | ModuleError::NoDynamicResources(_)
        )
    }
}
