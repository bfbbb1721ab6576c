//! Fob HMR - the build side of hot module replacement.
//!
//! The [`HmrCoordinator`] turns file changes into serialized compile
//! batches and broadcasts each result to connected clients. [`HmrServer`]
//! exposes the event stream and the lazy compile endpoint over HTTP, and
//! the [`watcher`] module feeds file-system changes into the coordinator.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fob_config::HmrConfig;
//! use fob_hmr::{Compiler, HmrCoordinator};
//!
//! # async fn example(compiler: Arc<dyn Compiler>) {
//! let coordinator = HmrCoordinator::new(compiler, &HmrConfig::default());
//! coordinator.trigger_update(["src/app.tsx"], false);
//! coordinator.wait_idle().await;
//! # }
//! ```

pub mod clients;
pub mod compiler;
pub mod coordinator;
pub mod dev;
pub mod error;
pub mod logger;
pub mod queue;
pub mod server;
pub mod watcher;

pub use clients::ClientRegistry;
pub use compiler::{Compiler, ResourceMeta};
pub use coordinator::{BatchOutcome, BatchRecord, CoordinatorStatus, HmrCoordinator};
pub use error::{HmrError, Result};
pub use queue::{Priority, UpdateBatch, UpdateKind, UpdateQueue, UpdateQueueItem};
pub use server::HmrServer;
pub use watcher::{FileChange, FileWatcher, forward_changes};
