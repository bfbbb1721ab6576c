//! Scriptable compiler shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use fob_hmr::{Compiler, HmrError, ResourceMeta};
use fob_protocol::{HmrUpdateResult, Resource};
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::{Notify, Semaphore};

/// Records every batch; each path compiles to `<path>.js`.
///
/// A gated compiler blocks inside `update` until [`release`](Self::release)
/// hands out a permit, which keeps a batch in flight while a test queues
/// more work behind it.
pub struct FakeCompiler {
    known: HashSet<String>,
    resources: IndexMap<String, Vec<u8>>,
    calls: Mutex<Vec<Vec<String>>>,
    lazy_calls: Mutex<Vec<(Vec<String>, bool)>>,
    failures_left: AtomicU32,
    panic_next: AtomicBool,
    gate: Option<Semaphore>,
    entered: Notify,
}

impl FakeCompiler {
    pub fn new(known: &[&str]) -> Self {
        Self {
            known: known.iter().map(|id| id.to_string()).collect(),
            resources: IndexMap::new(),
            calls: Mutex::new(Vec::new()),
            lazy_calls: Mutex::new(Vec::new()),
            failures_left: AtomicU32::new(0),
            panic_next: AtomicBool::new(false),
            gate: None,
            entered: Notify::new(),
        }
    }

    pub fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub fn failing(self, times: u32) -> Self {
        self.failures_left.store(times, Ordering::SeqCst);
        self
    }

    pub fn panicking(self) -> Self {
        self.panic_next.store(true, Ordering::SeqCst);
        self
    }

    pub fn with_resource(mut self, name: &str, content: &str) -> Self {
        self.resources.insert(name.to_string(), content.as_bytes().to_vec());
        self
    }

    /// Let `batches` more compiles through the gate.
    pub fn release(&self, batches: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(batches);
        }
    }

    /// Resolves once a compile has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }

    /// Lazy batches with the target they were compiled for.
    pub fn lazy_calls(&self) -> Vec<(Vec<String>, bool)> {
        self.lazy_calls.lock().clone()
    }
}

#[async_trait]
impl Compiler for FakeCompiler {
    async fn update(&self, paths: &[String]) -> fob_hmr::Result<HmrUpdateResult> {
        self.calls.lock().push(paths.to_vec());
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| HmrError::Shutdown)?
                .forget();
        }

        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("compiler crashed");
        }

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(HmrError::Compile(format!("boom in {}", paths.join(","))));
        }

        let mut result = HmrUpdateResult {
            changed: paths.to_vec(),
            mutable_modules: format!("/* {} */", paths.join(",")),
            ..Default::default()
        };
        for path in paths {
            result
                .boundaries
                .insert(path.clone(), vec![path.clone()]);
            result
                .dynamic_resources_map
                .insert(path.clone(), vec![Resource::script(format!("{path}.js"))]);
        }
        Ok(result)
    }

    async fn update_lazy(&self, paths: &[String], node: bool) -> fob_hmr::Result<HmrUpdateResult> {
        self.lazy_calls.lock().push((paths.to_vec(), node));
        self.update(paths).await
    }

    fn has_module(&self, id: &str) -> bool {
        self.known.contains(id)
    }

    fn resource(&self, name: &str) -> Option<Vec<u8>> {
        self.resources.get(name).cloned()
    }

    fn resources_map(&self) -> IndexMap<String, ResourceMeta> {
        self.resources
            .iter()
            .map(|(name, content)| {
                (
                    name.clone(),
                    ResourceMeta {
                        name: name.clone(),
                        size: content.len(),
                    },
                )
            })
            .collect()
    }
}
