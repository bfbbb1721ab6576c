//! Module runtime for fob development bundles.
//!
//! A [`ModuleSystem`] holds the registry and cache that bundled chunks
//! register into. Generated code uses the [`interop`] helpers at ESM/CJS
//! boundaries, [`hot::apply_update`] applies HMR results to the live graph,
//! and [`LazyCompilation`] turns dynamic imports of not-yet-built modules into
//! coalesced compile requests.
//!
//! ```
//! use fob_runtime::{ModuleSystem, RuntimeOptions, Value, initializer};
//!
//! let system = ModuleSystem::new(RuntimeOptions::default());
//! system
//!     .register("answer", initializer(|_system, module| {
//!         module.set_exports(42);
//!         Ok(())
//!     }))
//!     .unwrap();
//!
//! assert_eq!(system.require("answer").unwrap(), Value::from(42));
//! ```

pub mod error;
pub mod hot;
pub mod interop;
pub mod lazy;
pub mod loader;
pub mod module;
pub mod options;
pub mod system;
pub mod value;

pub use error::{ModuleError, Result};
pub use hot::{HotContext, HotHook, UpdateEvaluator, UpdateOutcome, apply_update};
pub use interop::Interop;
pub use lazy::{LazyCompilation, LazyCompileClient};
pub use loader::{NoopLoader, ResourceLoader, StaticLoader};
pub use module::{Initializer, Module, ModuleState, initializer};
pub use options::{MissingModulePolicy, RuntimeOptions};
pub use system::ModuleSystem;
pub use value::{Binding, Function, Object, Property, Value};
