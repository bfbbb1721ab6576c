//! Fob protocol - the wire contract between the dev server and the bundle.
//!
//! Both sides of hot module replacement speak the types defined here:
//!
//! - [`resource`] - resources a dynamically imported module needs loaded
//! - [`update`] - the HMR update payload and the broadcast envelope
//! - [`lazy`] - the `/__lazy_compile` request/response contract
//!
//! Everything serializes with serde using the camelCase field names the
//! browser-side runtime expects.

pub mod error;
pub mod lazy;
pub mod resource;
pub mod update;

pub use error::{ProtocolError, Result};
pub use lazy::{LazyCompileRequest, LazyCompileResponse};
pub use resource::{DynamicResourceMap, Resource, ResourceType};
pub use update::{HmrMessage, HmrUpdateResult};
