use async_trait::async_trait;
use fob_protocol::Resource;
use rustc_hash::FxHashMap;
use std::cell::RefCell;

use crate::error::{ModuleError, Result};
use crate::module::Initializer;
use crate::system::ModuleSystem;

/// Fetches and executes one dynamic resource.
///
/// A `Script` resource is expected to register its modules with `system`
/// before the returned future resolves. A `Link` resource (stylesheet) has no
/// module side effects.
#[async_trait(?Send)]
pub trait ResourceLoader {
    async fn load(&self, system: &ModuleSystem, resource: &Resource) -> Result<()>;
}

/// Loader that never has anything to load; every dynamic resource fails.
#[derive(Debug, Default)]
pub struct NoopLoader;

#[async_trait(?Send)]
impl ResourceLoader for NoopLoader {
    async fn load(&self, _system: &ModuleSystem, resource: &Resource) -> Result<()> {
        if resource.is_script() {
            return Err(ModuleError::ResourceLoad {
                path: resource.path.clone(),
                message: "no resource loader configured".to_string(),
            });
        }
        Ok(())
    }
}

/// In-memory loader: each script path maps to the modules it registers.
///
/// Records the order in which resources were loaded.
#[derive(Default)]
pub struct StaticLoader {
    scripts: RefCell<FxHashMap<String, Vec<(String, Initializer)>>>,
    loaded: RefCell<Vec<String>>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that loading `path` registers `id` (in resource pot `path`).
    pub fn script(self, path: impl Into<String>, id: impl Into<String>, init: Initializer) -> Self {
        self.add_script(path, id, init);
        self
    }

    pub fn add_script(&self, path: impl Into<String>, id: impl Into<String>, init: Initializer) {
        self.scripts
            .borrow_mut()
            .entry(path.into())
            .or_default()
            .push((id.into(), init));
    }

    /// Paths of every resource loaded so far, links included.
    pub fn loaded(&self) -> Vec<String> {
        self.loaded.borrow().clone()
    }
}

#[async_trait(?Send)]
impl ResourceLoader for StaticLoader {
    async fn load(&self, system: &ModuleSystem, resource: &Resource) -> Result<()> {
        self.loaded.borrow_mut().push(resource.path.clone());
        if !resource.is_script() {
            return Ok(());
        }

        let modules = self
            .scripts
            .borrow()
            .get(&resource.path)
            .cloned()
            .ok_or_else(|| ModuleError::ResourceLoad {
                path: resource.path.clone(),
                message: "not found".to_string(),
            })?;

        for (id, init) in modules {
            system.register_in(&resource.path, &id, init)?;
        }
        Ok(())
    }
}
