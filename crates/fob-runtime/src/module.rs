use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::hot::{HotContext, HotHook};
use crate::system::ModuleSystem;
use crate::value::{Object, Value};

/// Module factory. Receives the owning system (for nested `require`s) and the
/// freshly cached module whose `exports` it fills in.
pub type Initializer = Rc<dyn Fn(&ModuleSystem, &Module) -> Result<()>>;

/// Wrap a closure as an [`Initializer`].
pub fn initializer(f: impl Fn(&ModuleSystem, &Module) -> Result<()> + 'static) -> Initializer {
    Rc::new(f)
}

/// Lifecycle of a module id inside a [`ModuleSystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Initializer known, never required (or evicted after a failed init).
    Registered,
    /// Cached and currently running its initializer.
    Instantiating,
    Initialized,
    /// Evicted by the update path; may be registered again.
    Invalidated,
}

/// A live module instance, shared between the cache and its importers.
#[derive(Clone)]
pub struct Module(Rc<ModuleRecord>);

struct ModuleRecord {
    id: String,
    exports: RefCell<Value>,
    meta: Object,
    resource_pot: Option<String>,
    hooks: RefCell<Vec<HotHook>>,
    data: Object,
}

impl Module {
    pub(crate) fn new(id: &str, resource_pot: Option<String>, meta: Object, data: Object) -> Self {
        Self(Rc::new(ModuleRecord {
            id: id.to_string(),
            exports: RefCell::new(Object::new().into()),
            meta,
            resource_pot,
            hooks: RefCell::new(Vec::new()),
            data,
        }))
    }

    pub fn id(&self) -> &str {
        &self.0.id
    }

    /// Current exports value. Identity is stable while the module stays cached
    /// unless the initializer replaces it with [`Module::set_exports`].
    pub fn exports(&self) -> Value {
        self.0.exports.borrow().clone()
    }

    /// Exports as an object, for the common case of named exports.
    pub fn exports_object(&self) -> Option<Object> {
        self.0.exports.borrow().as_object().cloned()
    }

    /// CommonJS `module.exports = value`.
    pub fn set_exports(&self, value: impl Into<Value>) {
        *self.0.exports.borrow_mut() = value.into();
    }

    /// `{ env, url }` bag computed at instantiation.
    pub fn meta(&self) -> &Object {
        &self.0.meta
    }

    pub fn resource_pot(&self) -> Option<&str> {
        self.0.resource_pot.as_deref()
    }

    /// Hot-update API for this instance.
    pub fn hot(&self) -> HotContext<'_> {
        HotContext::new(self)
    }

    pub fn ptr_eq(&self, other: &Module) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn push_hook(&self, hook: HotHook) {
        self.0.hooks.borrow_mut().push(hook);
    }

    /// Snapshot of registered hooks. Callbacks run on the snapshot so they can
    /// register new hooks without re-entering the borrow.
    pub(crate) fn hooks(&self) -> Vec<HotHook> {
        self.0.hooks.borrow().clone()
    }

    pub(crate) fn data(&self) -> &Object {
        &self.0.data
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.0.id)
            .field("resource_pot", &self.0.resource_pot)
            .finish_non_exhaustive()
    }
}
