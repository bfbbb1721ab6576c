//! Configuration for the Fob dev server.
//!
//! [`DevConfig`] groups the server address with HMR, lazy compilation,
//! file watching and module runtime settings. Load it with
//! [`ConfigDiscovery`] or [`DevConfig::load`].

pub mod dev;
pub mod discovery;
pub mod error;
pub mod validation;

pub use dev::*;
pub use discovery::{ConfigDiscovery, CONFIG_FILE, ENV_PREFIX};
pub use error::*;
pub use validation::MAX_RETRIES_LIMIT;
