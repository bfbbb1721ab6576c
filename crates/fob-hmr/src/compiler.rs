//! Interface to the incremental compiler driven by the coordinator.

use async_trait::async_trait;
use fob_protocol::HmrUpdateResult;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Metadata for one built artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMeta {
    pub name: String,
    pub size: usize,
}

/// Incremental compiler able to rebuild a set of changed modules.
///
/// The coordinator never calls [`update`](Compiler::update) while a previous
/// call is still running.
#[async_trait]
pub trait Compiler: Send + Sync {
    /// Rebuild the given module paths.
    async fn update(&self, paths: &[String]) -> Result<HmrUpdateResult>;

    /// Compile modules requested by a lazy import. `node` selects a Node
    /// target for the emitted chunks.
    async fn update_lazy(&self, paths: &[String], node: bool) -> Result<HmrUpdateResult> {
        let _ = node;
        self.update(paths).await
    }

    /// Whether `id` is part of the current module graph.
    fn has_module(&self, id: &str) -> bool;

    /// Bytes of a built resource such as `index.js` or `main.css`.
    fn resource(&self, name: &str) -> Option<Vec<u8>>;

    fn resources_map(&self) -> IndexMap<String, ResourceMeta>;
}
