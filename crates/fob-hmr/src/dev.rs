//! Wiring for a complete dev session.

use std::path::PathBuf;
use std::sync::Arc;

use fob_config::DevConfig;
use tracing::info;

use crate::compiler::Compiler;
use crate::coordinator::HmrCoordinator;
use crate::error::Result;
use crate::logger;
use crate::server::HmrServer;
use crate::watcher::{FileWatcher, forward_changes};

/// Watch `root`, recompile changes through `compiler` and serve clients
/// until the server stops.
///
/// Installs the default logger unless the host already set a subscriber.
pub async fn run(config: DevConfig, root: PathBuf, compiler: Arc<dyn Compiler>) -> Result<()> {
    logger::init_logger(false, false, !logger::should_use_colors());
    config.validate()?;

    let coordinator = HmrCoordinator::new(compiler, &config.hmr);
    let (watcher, changes) = FileWatcher::from_config(root.clone(), &config.watch)?;
    let forwarder = tokio::spawn(forward_changes(changes, coordinator.clone(), root));

    info!(url = %config.server_url(), "starting dev server");
    let server = HmrServer::new(config, coordinator);
    let result = server.serve().await;

    forwarder.abort();
    drop(watcher);
    result
}
