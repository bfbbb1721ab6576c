//! Coalescing of dynamic-require misses into lazy compile requests.

use async_trait::async_trait;
use fob_protocol::{DynamicResourceMap, LazyCompileRequest, LazyCompileResponse, Resource};
use fob_runtime::{
    LazyCompilation, LazyCompileClient, ModuleError, ModuleSystem, RuntimeOptions, StaticLoader,
    initializer,
};
use futures::future::join_all;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

/// Dev server stand-in: "compiles" each requested path into `<path>.js` and
/// answers with the full resource map, yielding once per request.
#[derive(Default)]
struct FakeServer {
    requests: RefCell<Vec<LazyCompileRequest>>,
    compiled: RefCell<DynamicResourceMap>,
    failures_left: Cell<u32>,
    /// Requests containing this path never get an answer.
    hangs_on: Option<String>,
}

impl FakeServer {
    fn failing(times: u32) -> Self {
        let server = Self::default();
        server.failures_left.set(times);
        server
    }

    fn hanging_on(path: &str) -> Self {
        Self {
            hangs_on: Some(path.to_string()),
            ..Self::default()
        }
    }

    fn batches(&self) -> Vec<Vec<String>> {
        self.requests
            .borrow()
            .iter()
            .map(|request| request.paths.clone())
            .collect()
    }
}

#[async_trait(?Send)]
impl LazyCompileClient for FakeServer {
    async fn fetch(&self, request: LazyCompileRequest) -> fob_runtime::Result<LazyCompileResponse> {
        self.requests.borrow_mut().push(request.clone());
        tokio::task::yield_now().await;

        if self
            .hangs_on
            .as_ref()
            .is_some_and(|path| request.paths.contains(path))
        {
            futures::future::pending::<()>().await;
        }

        if self.failures_left.get() > 0 {
            self.failures_left.set(self.failures_left.get() - 1);
            return Err(ModuleError::ResourceLoad {
                path: "/__lazy_compile".to_string(),
                message: "connection refused".to_string(),
            });
        }

        let mut compiled = self.compiled.borrow_mut();
        for path in &request.paths {
            compiled.insert(path.clone(), vec![Resource::script(format!("{path}.js"))]);
        }
        Ok(LazyCompileResponse::from_resource_map(&compiled))
    }
}

fn lazy_system(server: Rc<FakeServer>) -> (ModuleSystem, Rc<LazyCompilation>) {
    let loader = StaticLoader::new();
    for id in ["lazy/a", "lazy/b", "lazy/c"] {
        loader.add_script(
            format!("{id}.js"),
            id,
            initializer(move |_s, m| {
                m.exports_object().unwrap().set("id", id);
                Ok(())
            }),
        );
    }
    let system = ModuleSystem::with_loader(RuntimeOptions::default(), Rc::new(loader));
    let lazy = system.enable_lazy_compilation(LazyCompilation::new(server));
    (system, lazy)
}

#[tokio::test]
async fn test_concurrent_misses_send_one_request() {
    let server = Rc::new(FakeServer::default());
    let (system, lazy) = lazy_system(server.clone());

    let results = join_all((0..10).map(|_| system.dynamic_require("lazy/a"))).await;

    assert_eq!(lazy.requests_sent(), 1);
    assert_eq!(server.batches(), vec![vec!["lazy/a".to_string()]]);

    let first = results[0].clone().unwrap();
    assert_eq!(first.get("id").as_str(), Some("lazy/a"));
    for result in &results {
        assert!(result.as_ref().unwrap().strict_equals(&first));
    }
    assert!(!lazy.is_compiling());
}

#[tokio::test]
async fn test_requests_during_flight_join_next_batch() {
    let server = Rc::new(FakeServer::default());
    let (system, lazy) = lazy_system(server.clone());

    let results = join_all([
        system.dynamic_require("lazy/a"),
        system.dynamic_require("lazy/b"),
        system.dynamic_require("lazy/c"),
        system.dynamic_require("lazy/b"),
    ])
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(
        server.batches(),
        vec![
            vec!["lazy/a".to_string()],
            vec!["lazy/b".to_string(), "lazy/c".to_string()],
        ]
    );
    assert_eq!(lazy.requests_sent(), 2);

    let tokens: Vec<_> = server
        .requests
        .borrow()
        .iter()
        .map(|request| request.token.clone())
        .collect();
    assert_eq!(tokens, vec!["1", "2"]);
}

#[tokio::test]
async fn test_failure_rejects_batch_and_clears_flag() {
    let server = Rc::new(FakeServer::failing(3));
    let (system, lazy) = lazy_system(server.clone());

    let results = join_all([
        system.dynamic_require("lazy/a"),
        system.dynamic_require("lazy/a"),
    ])
    .await;

    for result in results {
        let err = result.unwrap_err();
        assert!(matches!(err, ModuleError::LazyCompile { ref paths, .. } if paths == &["lazy/a"]));
    }
    // One attempt plus two retries.
    assert_eq!(lazy.requests_sent(), 3);
    assert!(!lazy.is_compiling());

    // The coalescer is usable again once the server recovers.
    let value = system.dynamic_require("lazy/a").await.unwrap();
    assert_eq!(value.get("id").as_str(), Some("lazy/a"));
    assert_eq!(lazy.requests_sent(), 4);
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let server = Rc::new(FakeServer::failing(1));
    let (system, lazy) = lazy_system(server);

    system.dynamic_require("lazy/b").await.unwrap();
    assert_eq!(lazy.requests_sent(), 2);
}

#[tokio::test]
async fn test_node_flag_is_forwarded() {
    let server = Rc::new(FakeServer::default());
    let system = ModuleSystem::default();
    let lazy = system.enable_lazy_compilation(
        LazyCompilation::new(server.clone())
            .with_node(true)
            .with_max_retries(0),
    );

    // The plain system has no loader, so resolution fails after compiling.
    assert!(system.dynamic_require("lazy/a").await.is_err());
    assert_eq!(lazy.requests_sent(), 1);

    let request = server.requests.borrow()[0].clone();
    assert!(request.node);
    assert!(request.to_query().ends_with("&node=true"));
}

#[tokio::test]
async fn test_resolved_import_does_not_wait_for_later_batch() {
    let server = Rc::new(FakeServer::hanging_on("lazy/b"));
    let (system, lazy) = lazy_system(server.clone());

    let mut a = Box::pin(system.dynamic_require("lazy/a"));
    let mut b = Box::pin(system.dynamic_require("lazy/b"));
    // `a` sends its request; `b` queues behind it.
    assert!(futures::poll!(a.as_mut()).is_pending());
    assert!(futures::poll!(b.as_mut()).is_pending());

    let value = a.await.unwrap();
    assert_eq!(value.get("id").as_str(), Some("lazy/a"));

    // `b` takes over the next cycle, whose request never completes.
    let stalled = tokio::time::timeout(Duration::from_millis(50), b.as_mut()).await;
    assert!(stalled.is_err());
    assert!(lazy.is_compiling());
    assert_eq!(
        server.batches(),
        vec![vec!["lazy/a".to_string()], vec!["lazy/b".to_string()]]
    );

    // Abandoning the stalled import releases the coalescer.
    drop(b);
    assert!(!lazy.is_compiling());
}
