//! The module registry and cache.

use fob_protocol::{DynamicResourceMap, Resource};
use futures::future::{FutureExt, LocalBoxFuture, Shared};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, trace, warn};

use crate::error::{ModuleError, Result};
use crate::hot::HotHook;
use crate::interop::Interop;
use crate::lazy::LazyCompilation;
use crate::loader::{NoopLoader, ResourceLoader};
use crate::module::{Initializer, Module, ModuleState};
use crate::options::{MissingModulePolicy, RuntimeOptions};
use crate::value::{Object, Value};

type SharedLoad = Shared<LocalBoxFuture<'static, Result<()>>>;

struct Registration {
    initializer: Initializer,
    resource_pot: Option<String>,
    state: ModuleState,
}

struct SystemState {
    options: RuntimeOptions,
    registry: RefCell<FxHashMap<String, Registration>>,
    cache: RefCell<FxHashMap<String, Module>>,
    externals: RefCell<FxHashMap<String, Value>>,
    dynamic_resources: RefCell<Rc<DynamicResourceMap>>,
    loaded_resources: RefCell<FxHashSet<String>>,
    loading_resources: RefCell<FxHashMap<String, SharedLoad>>,
    /// Data objects handed from a disposed instance to its successor.
    hot_data: RefCell<FxHashMap<String, Object>>,
    /// module id -> ids of modules that required it
    importers: RefCell<FxHashMap<String, FxHashSet<String>>>,
    /// Ids whose initializers are currently running, innermost last.
    require_stack: RefCell<Vec<String>>,
    loader: Rc<dyn ResourceLoader>,
    lazy: RefCell<Option<Rc<LazyCompilation>>>,
    interop: Interop,
}

/// One bundle's module system.
///
/// Cloning yields another handle to the same registry. All state lives behind
/// `RefCell`s that are only borrowed inside synchronous sections; no borrow is
/// held while an initializer runs or across an `.await`.
#[derive(Clone)]
pub struct ModuleSystem {
    inner: Rc<SystemState>,
}

impl ModuleSystem {
    /// A system without a resource loader; dynamic scripts cannot be fetched.
    pub fn new(options: RuntimeOptions) -> Self {
        Self::with_loader(options, Rc::new(NoopLoader))
    }

    pub fn with_loader(options: RuntimeOptions, loader: Rc<dyn ResourceLoader>) -> Self {
        Self {
            inner: Rc::new(SystemState {
                options,
                registry: RefCell::default(),
                cache: RefCell::default(),
                externals: RefCell::default(),
                dynamic_resources: RefCell::default(),
                loaded_resources: RefCell::default(),
                loading_resources: RefCell::default(),
                hot_data: RefCell::default(),
                importers: RefCell::default(),
                require_stack: RefCell::default(),
                loader,
                lazy: RefCell::default(),
                interop: Interop::new(),
            }),
        }
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    pub fn interop(&self) -> &Interop {
        &self.inner.interop
    }

    /// Register a module that was not loaded from a resource pot.
    pub fn register(&self, id: &str, initializer: Initializer) -> Result<()> {
        self.register_entry(id, None, initializer)
    }

    /// Register a module shipped in `resource_pot`.
    pub fn register_in(&self, resource_pot: &str, id: &str, initializer: Initializer) -> Result<()> {
        self.register_entry(id, Some(resource_pot.to_string()), initializer)
    }

    fn register_entry(
        &self,
        id: &str,
        resource_pot: Option<String>,
        initializer: Initializer,
    ) -> Result<()> {
        let mut registry = self.inner.registry.borrow_mut();
        let live = registry
            .get(id)
            .is_some_and(|existing| existing.state != ModuleState::Invalidated);
        if live {
            return Err(ModuleError::DuplicateRegistration(id.to_string()));
        }
        trace!(module = id, "registered");
        registry.insert(
            id.to_string(),
            Registration {
                initializer,
                resource_pot,
                state: ModuleState::Registered,
            },
        );
        Ok(())
    }

    /// Replace the initializer of `id`, registering it if unknown.
    ///
    /// The hot-update path uses this for changed modules; a cached instance
    /// keeps running until it is invalidated.
    pub fn update(&self, id: &str, initializer: Initializer) {
        let mut registry = self.inner.registry.borrow_mut();
        match registry.get_mut(id) {
            Some(registration) => {
                registration.initializer = initializer;
                if registration.state == ModuleState::Invalidated {
                    registration.state = ModuleState::Registered;
                }
            }
            None => {
                registry.insert(
                    id.to_string(),
                    Registration {
                        initializer,
                        resource_pot: None,
                        state: ModuleState::Registered,
                    },
                );
            }
        }
    }

    /// Declare modules provided by the host environment.
    pub fn set_external_modules<I, K>(&self, externals: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut map = self.inner.externals.borrow_mut();
        for (id, value) in externals {
            map.insert(id.into(), value);
        }
    }

    /// Synchronously resolve the exports of `id`.
    ///
    /// A cached module (initialized or still instantiating) is returned as-is,
    /// which is what keeps circular requires from recursing. Otherwise the
    /// module is cached before its initializer runs; if the initializer fails
    /// the half-built entry is evicted and the error propagates.
    pub fn require(&self, id: &str) -> Result<Value> {
        self.record_importer(id);

        let cached = self.inner.cache.borrow().get(id).cloned();
        if let Some(module) = cached {
            return Ok(module.exports());
        }

        let registration = self
            .inner
            .registry
            .borrow()
            .get(id)
            .map(|r| (r.initializer.clone(), r.resource_pot.clone()));
        let Some((initializer, resource_pot)) = registration else {
            return self.require_missing(id);
        };

        let module = self.instantiate(id, resource_pot);
        self.inner
            .cache
            .borrow_mut()
            .insert(id.to_string(), module.clone());
        self.set_state(id, ModuleState::Instantiating);

        self.inner.require_stack.borrow_mut().push(id.to_string());
        let outcome = initializer(self, &module);
        self.inner.require_stack.borrow_mut().pop();

        match outcome {
            Ok(()) => {
                self.set_state(id, ModuleState::Initialized);
                Ok(module.exports())
            }
            Err(err) => {
                debug!(module = id, error = %err, "initializer failed, evicting");
                self.inner.cache.borrow_mut().remove(id);
                self.set_state(id, ModuleState::Registered);
                Err(err)
            }
        }
    }

    fn require_missing(&self, id: &str) -> Result<Value> {
        let external = self.inner.externals.borrow().get(id).cloned();
        if let Some(external) = external {
            return Ok(external);
        }
        match self.inner.options.missing_module {
            MissingModulePolicy::Error => Err(ModuleError::ModuleNotRegistered(id.to_string())),
            MissingModulePolicy::Empty => {
                warn!(module = id, "module is not registered, using empty exports");
                Ok(Object::new().into())
            }
        }
    }

    fn instantiate(&self, id: &str, resource_pot: Option<String>) -> Module {
        let options = &self.inner.options;
        let env = Object::from_entries(options.env.iter().map(|(k, v)| (k.clone(), v.as_str())));
        let meta = Object::from_entries([
            ("env", Value::from(env)),
            (
                "url",
                Value::from(options.resource_url(resource_pot.as_deref().unwrap_or(id))),
            ),
        ]);
        let data = self
            .inner
            .hot_data
            .borrow_mut()
            .remove(id)
            .unwrap_or_default();
        Module::new(id, resource_pot, meta, data)
    }

    fn record_importer(&self, id: &str) {
        let stack = self.inner.require_stack.borrow();
        let Some(parent) = stack.last().filter(|parent| parent.as_str() != id) else {
            return;
        };
        self.inner
            .importers
            .borrow_mut()
            .entry(id.to_string())
            .or_default()
            .insert(parent.clone());
    }

    fn set_state(&self, id: &str, state: ModuleState) {
        if let Some(registration) = self.inner.registry.borrow_mut().get_mut(id) {
            registration.state = state;
        }
    }

    /// Resolve `id` through the dynamic resource map.
    ///
    /// Every resource listed for `id` is loaded, in order, before `require`
    /// runs. Ids missing from the map are handed to lazy compilation when it
    /// is enabled; otherwise they are a structural error.
    ///
    /// Dev bundles name modules by their project-relative path, so `id` is
    /// sent to the server as the module path as well.
    pub async fn dynamic_require(&self, id: &str) -> Result<Value> {
        if self.has_module(id) || self.is_registered(id) {
            return self.require(id);
        }

        if self.inner.dynamic_resources.borrow().contains_key(id) {
            return self.load_dynamic(id).await;
        }

        let lazy = self.inner.lazy.borrow().clone();
        match lazy {
            Some(lazy) => lazy.compile(self, id, id).await,
            None => Err(ModuleError::NoDynamicResources(id.to_string())),
        }
    }

    /// `dynamic_require` without the lazy compilation fallback.
    pub(crate) async fn load_dynamic(&self, id: &str) -> Result<Value> {
        // Read the map fresh: an update may have replaced it.
        let resources = self
            .inner
            .dynamic_resources
            .borrow()
            .get(id)
            .cloned()
            .ok_or_else(|| ModuleError::NoDynamicResources(id.to_string()))?;

        for resource in &resources {
            self.load_resource(resource).await?;
        }
        self.require(id)
    }

    async fn load_resource(&self, resource: &Resource) -> Result<()> {
        if self.inner.loaded_resources.borrow().contains(&resource.path) {
            return Ok(());
        }

        let in_flight = self
            .inner
            .loading_resources
            .borrow()
            .get(&resource.path)
            .cloned();
        let load = match in_flight {
            Some(load) => load,
            None => {
                let system = self.clone();
                let resource = resource.clone();
                let path = resource.path.clone();
                let load = async move {
                    let loader = system.inner.loader.clone();
                    let outcome = loader.load(&system, &resource).await;
                    system
                        .inner
                        .loading_resources
                        .borrow_mut()
                        .remove(&resource.path);
                    if outcome.is_ok() {
                        system
                            .inner
                            .loaded_resources
                            .borrow_mut()
                            .insert(resource.path.clone());
                    }
                    outcome
                }
                .boxed_local()
                .shared();
                self.inner
                    .loading_resources
                    .borrow_mut()
                    .insert(path, load.clone());
                load
            }
        };
        load.await
    }

    /// Current dynamic resource map.
    pub fn dynamic_resources(&self) -> Rc<DynamicResourceMap> {
        self.inner.dynamic_resources.borrow().clone()
    }

    /// Replace the dynamic resource map wholesale.
    pub fn set_dynamic_resources_map(&self, map: DynamicResourceMap) {
        *self.inner.dynamic_resources.borrow_mut() = Rc::new(map);
    }

    /// Attach lazy compilation; later `dynamic_require` misses go through it.
    pub fn enable_lazy_compilation(&self, lazy: LazyCompilation) -> Rc<LazyCompilation> {
        let lazy = Rc::new(lazy);
        *self.inner.lazy.borrow_mut() = Some(lazy.clone());
        lazy
    }

    pub fn lazy_compilation(&self) -> Option<Rc<LazyCompilation>> {
        self.inner.lazy.borrow().clone()
    }

    /// Evict the cached instance of `id`, running its dispose callbacks first.
    ///
    /// Returns false when `id` was not cached.
    pub fn invalidate_module(&self, id: &str) -> bool {
        let Some(module) = self.module(id) else {
            return false;
        };

        let data = Object::new();
        for hook in module.hooks() {
            if let HotHook::Dispose(callback) = hook {
                callback(&data);
            }
        }

        self.inner.cache.borrow_mut().remove(id);
        self.inner
            .hot_data
            .borrow_mut()
            .insert(id.to_string(), data);
        self.set_state(id, ModuleState::Invalidated);
        debug!(module = id, "invalidated");
        true
    }

    /// Drop `id` from the graph entirely, running its prune callbacks.
    pub fn remove_module(&self, id: &str) -> bool {
        if let Some(module) = self.module(id) {
            for hook in module.hooks() {
                if let HotHook::Prune(callback) = hook {
                    callback(module.data());
                }
            }
        }

        let cached = self.inner.cache.borrow_mut().remove(id).is_some();
        let registered = self.inner.registry.borrow_mut().remove(id).is_some();
        self.inner.hot_data.borrow_mut().remove(id);

        let mut importers = self.inner.importers.borrow_mut();
        importers.remove(id);
        for set in importers.values_mut() {
            set.remove(id);
        }

        debug!(module = id, "removed");
        cached || registered
    }

    /// Lifecycle state of `id`, `None` if it is unregistered.
    pub fn state(&self, id: &str) -> Option<ModuleState> {
        self.inner.registry.borrow().get(id).map(|r| r.state)
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.inner.registry.borrow().contains_key(id)
    }

    /// True when `id` has a cached instance.
    pub fn has_module(&self, id: &str) -> bool {
        self.inner.cache.borrow().contains_key(id)
    }

    pub fn module(&self, id: &str) -> Option<Module> {
        self.inner.cache.borrow().get(id).cloned()
    }

    /// Registered ids, sorted.
    pub fn module_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.inner.registry.borrow().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Ids of modules that required `id`, sorted.
    pub fn importers_of(&self, id: &str) -> Vec<String> {
        let mut importers: Vec<_> = self
            .inner
            .importers
            .borrow()
            .get(id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        importers.sort();
        importers
    }

    /// Paths of dynamic resources that finished loading.
    pub fn loaded_resources(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.inner.loaded_resources.borrow().iter().cloned().collect();
        paths.sort();
        paths
    }
}

impl Default for ModuleSystem {
    fn default() -> Self {
        Self::new(RuntimeOptions::default())
    }
}
