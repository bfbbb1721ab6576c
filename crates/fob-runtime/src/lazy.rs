//! Lazy (on-demand) compilation on the runtime side.
//!
//! Concurrent `dynamic_require` misses are coalesced: a path already being
//! compiled shares the in-flight result, and paths requested while a request
//! is outstanding are queued and sent together in the next one. One request
//! is outstanding at a time.

use async_trait::async_trait;
use fob_protocol::{LazyCompileRequest, LazyCompileResponse};
use futures::channel::oneshot;
use futures::future::{Either, FutureExt, LocalBoxFuture, Shared, select};
use rustc_hash::FxHashMap;
use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;
use tracing::{debug, warn};

use crate::error::{ModuleError, Result};
use crate::system::ModuleSystem;
use crate::value::Value;

/// Default number of extra attempts for a failed compile request.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Transport to the dev server's lazy-compile endpoint.
#[async_trait(?Send)]
pub trait LazyCompileClient {
    async fn fetch(&self, request: LazyCompileRequest) -> Result<LazyCompileResponse>;
}

type SharedCompile = Shared<LocalBoxFuture<'static, Result<Value>>>;

struct QueueItem {
    module_path: String,
    module_id: String,
    resolve: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
struct CoalescerState {
    /// module path -> result shared by every caller waiting on it
    compiling: FxHashMap<String, SharedCompile>,
    /// Requests not yet sent.
    queue: Vec<QueueItem>,
    /// Set while some caller is driving a dispatch cycle.
    lazy_compiling: bool,
    /// Callers waiting for the running cycle to end.
    parked: Vec<oneshot::Sender<()>>,
}

enum Step {
    Drive,
    Park(oneshot::Receiver<()>),
    Wait,
}

pub struct LazyCompilation {
    client: Rc<dyn LazyCompileClient>,
    node: bool,
    max_retries: u32,
    state: RefCell<CoalescerState>,
    token: Cell<u64>,
    requests_sent: Cell<usize>,
}

impl LazyCompilation {
    pub fn new(client: Rc<dyn LazyCompileClient>) -> Self {
        Self {
            client,
            node: false,
            max_retries: DEFAULT_MAX_RETRIES,
            state: RefCell::default(),
            token: Cell::new(0),
            requests_sent: Cell::new(0),
        }
    }

    /// Ask the server for a Node-targeted build.
    pub fn with_node(mut self, node: bool) -> Self {
        self.node = node;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Number of requests handed to the transport, retries included.
    pub fn requests_sent(&self) -> usize {
        self.requests_sent.get()
    }

    pub fn is_compiling(&self) -> bool {
        self.state.borrow().lazy_compiling
    }

    /// Compile `module_path` on demand, then resolve `module_id` through the
    /// refreshed dynamic resource map.
    ///
    /// Whoever finds no cycle running sends the queued batch. Each driver
    /// sends a single batch and then hands the flag back, so a caller
    /// returns as soon as its own module is ready even if later batches
    /// are still outstanding. Callers that can't drive park until the
    /// running cycle ends.
    pub async fn compile(
        &self,
        system: &ModuleSystem,
        module_path: &str,
        module_id: &str,
    ) -> Result<Value> {
        let mut waiter = self.join(module_path, module_id);

        loop {
            if let Some(result) = waiter.clone().now_or_never() {
                return result;
            }

            match self.next_step() {
                Step::Drive => self.run_cycle(system).await,
                Step::Park(cycle_done) => {
                    if let Either::Left((result, _)) = select(&mut waiter, cycle_done).await {
                        return result;
                    }
                }
                Step::Wait => return waiter.await,
            }
        }
    }

    /// Shared result for `module_path`, queueing it if nobody asked yet.
    fn join(&self, module_path: &str, module_id: &str) -> SharedCompile {
        let mut state = self.state.borrow_mut();
        if let Some(in_flight) = state.compiling.get(module_path) {
            return in_flight.clone();
        }

        let (resolve, rx) = oneshot::channel();
        let path = module_path.to_string();
        let waiter = async move {
            rx.await.unwrap_or_else(|_| {
                Err(ModuleError::LazyCompile {
                    paths: vec![path],
                    message: "compilation was cancelled".to_string(),
                })
            })
        }
        .boxed_local()
        .shared();
        state
            .compiling
            .insert(module_path.to_string(), waiter.clone());
        state.queue.push(QueueItem {
            module_path: module_path.to_string(),
            module_id: module_id.to_string(),
            resolve,
        });
        waiter
    }

    // Flag check and claim happen in one borrow.
    fn next_step(&self) -> Step {
        let mut state = self.state.borrow_mut();
        if state.lazy_compiling {
            let (wake, cycle_done) = oneshot::channel();
            state.parked.push(wake);
            Step::Park(cycle_done)
        } else if state.queue.is_empty() {
            Step::Wait
        } else {
            state.lazy_compiling = true;
            Step::Drive
        }
    }

    /// Send everything queued so far as one request.
    async fn run_cycle(&self, system: &ModuleSystem) {
        let mut guard = DispatchGuard {
            lazy: self,
            finished: false,
        };

        let batch = mem::take(&mut self.state.borrow_mut().queue);
        let paths: Vec<String> = batch.iter().map(|item| item.module_path.clone()).collect();
        debug!(?paths, "lazy compiling");

        let map = self
            .fetch_with_retries(&paths)
            .await
            .and_then(|response| {
                response
                    .into_resource_map()
                    .map_err(|err| ModuleError::LazyCompile {
                        paths: paths.clone(),
                        message: err.to_string(),
                    })
            });

        match map {
            Ok(map) => {
                system.set_dynamic_resources_map(map);
                for item in batch {
                    let result = system.load_dynamic(&item.module_id).await;
                    self.finish(item, result);
                }
            }
            Err(err) => {
                for item in batch {
                    self.finish(item, Err(err.clone()));
                }
            }
        }

        guard.finished = true;
    }

    async fn fetch_with_retries(&self, paths: &[String]) -> Result<LazyCompileResponse> {
        let mut attempt = 0;
        loop {
            let request = LazyCompileRequest::new(paths.to_vec(), self.next_token().to_string())
                .with_node(self.node);
            self.requests_sent.set(self.requests_sent.get() + 1);

            match self.client.fetch(request).await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < self.max_retries => {
                    attempt += 1;
                    warn!(?paths, attempt, error = %err, "lazy compile request failed, retrying");
                }
                Err(err) => {
                    return Err(match err {
                        err @ ModuleError::LazyCompile { .. } => err,
                        other => ModuleError::LazyCompile {
                            paths: paths.to_vec(),
                            message: other.to_string(),
                        },
                    });
                }
            }
        }
    }

    fn next_token(&self) -> u64 {
        let token = self.token.get() + 1;
        self.token.set(token);
        token
    }

    fn finish(&self, item: QueueItem, result: Result<Value>) {
        self.state.borrow_mut().compiling.remove(&item.module_path);
        // The waiter may have been dropped; nobody left to tell.
        let _ = item.resolve.send(result);
    }
}

/// Clears the dispatch flag however a cycle exits and wakes parked callers
/// so one of them can send the next batch.
///
/// If the driving future is dropped mid-request, queued items are rejected
/// and the compiling table is emptied so later misses start a fresh cycle.
struct DispatchGuard<'a> {
    lazy: &'a LazyCompilation,
    finished: bool,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let (parked, leftover, in_flight) = {
            let mut state = self.lazy.state.borrow_mut();
            state.lazy_compiling = false;
            let parked = mem::take(&mut state.parked);
            if self.finished {
                (parked, Vec::new(), FxHashMap::default())
            } else {
                (parked, mem::take(&mut state.queue), mem::take(&mut state.compiling))
            }
        };
        drop(in_flight);
        for item in leftover {
            let paths = vec![item.module_path.clone()];
            let _ = item.resolve.send(Err(ModuleError::LazyCompile {
                paths,
                message: "compilation was cancelled".to_string(),
            }));
        }
        for wake in parked {
            let _ = wake.send(());
        }
    }
}
