//! HMR update coordinator.
//!
//! Serializes change notifications into one compile at a time:
//!
//! ```text
//! Idle -> Queued -> Compiling -> Broadcasting -> (Compiling ...) -> Idle
//! ```
//!
//! Paths that arrive while a batch is compiling are merged into the next
//! batch. After every broadcast the queue is checked again, so the drain
//! task only returns to idle once nothing is pending.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use fob_config::HmrConfig;
use fob_protocol::{HmrMessage, HmrUpdateResult, LazyCompileResponse};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::clients::ClientRegistry;
use crate::compiler::Compiler;
use crate::error::{HmrError, Result};
use crate::queue::{LazyReply, Priority, UpdateBatch, UpdateKind, UpdateQueue, UpdateQueueItem};

/// Number of batch records kept for [`HmrCoordinator::history`].
pub const HISTORY_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorStatus {
    Idle,
    Queued,
    Compiling,
    Broadcasting,
}

#[derive(Debug, Clone)]
pub enum BatchOutcome {
    Updated(Arc<HmrUpdateResult>),
    Failed(String),
}

/// One compiled batch.
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub paths: Vec<String>,
    pub kind: UpdateKind,
    pub force: bool,
    /// Compile calls made, including retries
    pub attempts: u32,
    pub duration: Duration,
    pub outcome: BatchOutcome,
}

impl BatchRecord {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, BatchOutcome::Updated(_))
    }
}

struct QueueState {
    queue: UpdateQueue,
    status: CoordinatorStatus,
}

struct Inner {
    compiler: Arc<dyn Compiler>,
    clients: Arc<ClientRegistry>,
    max_retries: u32,
    overlay: bool,
    state: Mutex<QueueState>,
    status_tx: watch::Sender<CoordinatorStatus>,
    history: Mutex<VecDeque<BatchRecord>>,
    last_result: RwLock<Option<Arc<HmrUpdateResult>>>,
    batches_compiled: AtomicUsize,
}

/// Cheap to clone; all clones drive the same queue.
///
/// Triggering an update spawns the drain task, so it must happen inside a
/// tokio runtime.
#[derive(Clone)]
pub struct HmrCoordinator {
    inner: Arc<Inner>,
}

impl HmrCoordinator {
    pub fn new(compiler: Arc<dyn Compiler>, config: &HmrConfig) -> Self {
        Self::with_clients(compiler, Arc::new(ClientRegistry::new()), config)
    }

    pub fn with_clients(
        compiler: Arc<dyn Compiler>,
        clients: Arc<ClientRegistry>,
        config: &HmrConfig,
    ) -> Self {
        let (status_tx, _) = watch::channel(CoordinatorStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                compiler,
                clients,
                max_retries: config.max_retries,
                overlay: config.overlay,
                state: Mutex::new(QueueState {
                    queue: UpdateQueue::new(),
                    status: CoordinatorStatus::Idle,
                }),
                status_tx,
                history: Mutex::new(VecDeque::new()),
                last_result: RwLock::new(None),
                batches_compiled: AtomicUsize::new(0),
            }),
        }
    }

    /// Queue changed paths for recompilation.
    ///
    /// Paths the compiler does not know are dropped unless `force` is set.
    /// Returns the number of paths queued; zero means nothing was scheduled.
    pub fn trigger_update<I, S>(&self, paths: I, force: bool) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trigger_update_with_priority(paths, force, Priority::Normal)
    }

    pub fn trigger_update_with_priority<I, S>(
        &self,
        paths: I,
        force: bool,
        priority: Priority,
    ) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let compiler = &self.inner.compiler;
        let paths: Vec<String> = paths
            .into_iter()
            .map(Into::into)
            .filter(|path| force || compiler.has_module(path))
            .collect();

        if paths.is_empty() {
            debug!("no known modules in change set, skipping update");
            return 0;
        }

        let count = paths.len();
        self.enqueue(UpdateQueueItem::new(
            paths,
            priority,
            force,
            self.inner.max_retries,
        ));
        count
    }

    /// Compile modules on behalf of a lazy compile request and wait for the
    /// resulting resource map. `node` asks the compiler for a Node target.
    pub async fn lazy_compile(
        &self,
        paths: Vec<String>,
        node: bool,
    ) -> Result<LazyCompileResponse> {
        if paths.is_empty() {
            return Err(HmrError::Compile("no module paths requested".to_string()));
        }

        let (tx, rx) = oneshot::channel();
        self.enqueue(UpdateQueueItem::lazy(paths, node, self.inner.max_retries, tx));
        rx.await.map_err(|_| HmrError::Shutdown)?
    }

    fn enqueue(&self, item: UpdateQueueItem) {
        let start_drain = {
            let mut state = self.inner.state.lock();
            state.queue.push(item);
            if state.status == CoordinatorStatus::Idle {
                self.set_status(&mut state, CoordinatorStatus::Queued);
                true
            } else {
                false
            }
        };

        if start_drain {
            let coordinator = self.clone();
            tokio::spawn(async move { coordinator.drain().await });
        }
    }

    async fn drain(self) {
        loop {
            let batch = {
                let mut state = self.inner.state.lock();
                match state.queue.take_batch() {
                    Some(batch) => {
                        self.set_status(&mut state, CoordinatorStatus::Compiling);
                        batch
                    }
                    None => {
                        self.set_status(&mut state, CoordinatorStatus::Idle);
                        return;
                    }
                }
            };

            self.run_batch(batch).await;
        }
    }

    async fn run_batch(&self, batch: UpdateBatch) {
        let started = Instant::now();
        let kind = batch.kind();
        let UpdateBatch {
            paths,
            force,
            retries,
            node,
            replies,
            ..
        } = batch;

        self.inner.batches_compiled.fetch_add(1, Ordering::Relaxed);
        debug!(paths = ?paths, kind = ?kind, "compiling batch");

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            match self.compile(kind, &paths, node).await {
                Ok(result) => break Ok(result),
                Err(message) if attempts <= retries => {
                    warn!(attempt = attempts, error = %message, "compile failed, retrying");
                }
                Err(message) => break Err(message),
            }
        };

        {
            let mut state = self.inner.state.lock();
            self.set_status(&mut state, CoordinatorStatus::Broadcasting);
        }

        let duration = started.elapsed();
        let outcome = match outcome {
            Ok(result) => {
                let result = Arc::new(result);
                self.publish(kind, &paths, replies, &result, duration);
                *self.inner.last_result.write() = Some(Arc::clone(&result));
                BatchOutcome::Updated(result)
            }
            Err(message) => {
                error!(paths = ?paths, attempts, error = %message, "compile failed");
                self.publish_error(kind, replies, &message);
                BatchOutcome::Failed(message)
            }
        };

        self.record(BatchRecord {
            paths,
            kind,
            force,
            attempts,
            duration,
            outcome,
        });
    }

    async fn compile(
        &self,
        kind: UpdateKind,
        paths: &[String],
        node: bool,
    ) -> std::result::Result<HmrUpdateResult, String> {
        let compiler = &self.inner.compiler;
        let update = match kind {
            UpdateKind::Hmr => compiler.update(paths),
            UpdateKind::Lazy => compiler.update_lazy(paths, node),
        };
        match AssertUnwindSafe(update).catch_unwind().await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err("compiler panicked".to_string()),
        }
    }

    fn publish(
        &self,
        kind: UpdateKind,
        paths: &[String],
        replies: Vec<LazyReply>,
        result: &HmrUpdateResult,
        duration: Duration,
    ) {
        let duration_ms = duration.as_millis() as u64;
        match kind {
            UpdateKind::Hmr => {
                self.inner.clients.clear_error();
                let clients = self.inner.clients.broadcast(&HmrMessage::Update {
                    result: result.clone(),
                });
                info!(
                    changed = result.changed.len(),
                    added = result.added.len(),
                    removed = result.removed.len(),
                    clients,
                    duration_ms,
                    "HMR update broadcast"
                );
            }
            UpdateKind::Lazy => {
                let response =
                    LazyCompileResponse::from_resource_map(&result.dynamic_resources_map);
                info!(paths = ?paths, duration_ms, "lazy compilation finished");
                for reply in replies {
                    let _ = reply.send(Ok(response.clone()));
                }
            }
        }
    }

    fn publish_error(&self, kind: UpdateKind, replies: Vec<LazyReply>, message: &str) {
        match kind {
            UpdateKind::Hmr => {
                self.inner.clients.broadcast(&HmrMessage::Error {
                    message: message.to_string(),
                    overlay: self.inner.overlay,
                });
            }
            UpdateKind::Lazy => {
                for reply in replies {
                    let _ = reply.send(Err(HmrError::Compile(message.to_string())));
                }
            }
        }
    }

    fn record(&self, record: BatchRecord) {
        let mut history = self.inner.history.lock();
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(record);
    }

    fn set_status(&self, state: &mut QueueState, status: CoordinatorStatus) {
        state.status = status;
        self.inner.status_tx.send_replace(status);
    }

    pub fn status(&self) -> CoordinatorStatus {
        self.inner.state.lock().status
    }

    pub fn subscribe_status(&self) -> watch::Receiver<CoordinatorStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Resolve once no batch is queued or compiling.
    pub async fn wait_idle(&self) {
        let mut rx = self.subscribe_status();
        let _ = rx.wait_for(|status| *status == CoordinatorStatus::Idle).await;
    }

    /// Number of queued items not yet taken into a batch.
    pub fn pending(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Batches handed to the compiler so far, successful or not.
    pub fn batches_compiled(&self) -> usize {
        self.inner.batches_compiled.load(Ordering::Relaxed)
    }

    /// Result of the most recent successful compile.
    pub fn last_result(&self) -> Option<Arc<HmrUpdateResult>> {
        self.inner.last_result.read().clone()
    }

    /// Most recent batch records, oldest first.
    pub fn history(&self) -> Vec<BatchRecord> {
        self.inner.history.lock().iter().cloned().collect()
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.inner.clients
    }

    pub fn compiler(&self) -> &Arc<dyn Compiler> {
        &self.inner.compiler
    }
}
