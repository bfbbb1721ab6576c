//! ESM/CJS interop helpers called by generated module code.
//!
//! All helpers are total: non-object inputs take the primitive branch rather
//! than failing. Only [`Interop::interop_require_wildcard`] carries state (its
//! namespace memo cache), which is why it lives on a struct owned by the
//! module system instead of being a free function.

use rustc_hash::FxHashMap;
use std::cell::RefCell;

use crate::value::{Object, Property, Value, WeakObject};

/// Non-enumerable discriminator marking an exports object as ESM-shaped.
pub const ES_MODULE_FLAG: &str = "__esModule";

const DEFAULT: &str = "default";

/// True when `value` is an object carrying a truthy `__esModule` flag.
pub fn is_es_module(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.get(ES_MODULE_FLAG).truthy())
}

/// Default import of a value whose module kind is not provably ESM.
pub fn interop_require_default(obj: &Value) -> Value {
    if is_es_module(obj) {
        return obj.clone();
    }
    Object::from_entries([(DEFAULT, obj.clone())]).into()
}

/// `export * from`: copy every enumerable key of `from` except `default`
/// onto `to` as a live getter, skipping names `to` already has.
///
/// The first source applied wins and a module's own named exports (defined
/// before the star re-exports) are never overwritten. Returns `from`.
pub fn define_export_star(to: &Object, from: &Value) -> Value {
    if let Some(source) = from.as_object() {
        for key in source.own_enumerable_keys() {
            if key == DEFAULT || to.has_own(&key) {
                continue;
            }
            let source = source.clone();
            let name = key.clone();
            to.define_property(key, Property::getter(move || source.get(&name)));
        }
    }
    from.clone()
}

/// Define a live export `key` on `to` unless the name is already taken.
pub fn export_by_define_property(
    to: &Object,
    key: &str,
    getter: impl Fn() -> Value + 'static,
) -> bool {
    if to.has_own(key) {
        return false;
    }
    to.define_property(key, Property::getter(getter))
}

/// Named live export; same policy as [`export_by_define_property`].
pub fn define_export(to: &Object, key: &str, getter: impl Fn() -> Value + 'static) -> bool {
    export_by_define_property(to, key, getter)
}

/// `export { from_key as key } from '...'`: a getter reading through to `from`.
pub fn define_export_from(to: &Object, key: &str, from: &Value, from_key: &str) -> bool {
    let from = from.clone();
    let from_key = from_key.to_string();
    export_by_define_property(to, key, move || from.get(&from_key))
}

/// Safe default unwrap used by lowered default-import call sites.
pub fn import_default(value: &Value) -> Value {
    let default = value.get(DEFAULT);
    if default.is_undefined() {
        value.clone()
    } else {
        default
    }
}

/// Mark `to` as ESM-shaped. Idempotent.
pub fn define_export_es_module(to: &Object) {
    if !to.has_own(ES_MODULE_FLAG) {
        to.define_property(ES_MODULE_FLAG, Property::hidden(true));
    }
}

/// Both sides are weak. The namespace's `default` keeps its source alive,
/// so an entry lives exactly as long as someone still holds the namespace.
struct CachedNamespace {
    source: WeakObject,
    namespace: WeakObject,
}

impl CachedNamespace {
    fn is_alive(&self) -> bool {
        self.source.is_alive() && self.namespace.is_alive()
    }
}

/// Stateful half of the interop layer.
#[derive(Default)]
pub struct Interop {
    /// (object identity, node_interop) -> namespace built for it
    namespaces: RefCell<FxHashMap<(usize, bool), CachedNamespace>>,
}

impl Interop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace import (`import * as ns`) of an arbitrary value.
    ///
    /// ESM-marked objects are returned as-is unless `node_interop` is set.
    /// Primitives and functions are wrapped as `{ default }`. Any other object
    /// gets a namespace copying its own enumerable properties except
    /// `default` (accessors copied as descriptors, so getters stay lazy) plus
    /// a `default` pointing at the original; the namespace is memoized per
    /// object identity and `node_interop`.
    pub fn interop_require_wildcard(&self, obj: &Value, node_interop: bool) -> Value {
        if !node_interop && is_es_module(obj) {
            return obj.clone();
        }

        let Some(source) = obj.as_object() else {
            return Object::from_entries([(DEFAULT, obj.clone())]).into();
        };

        let key = (source.identity(), node_interop);
        if let Some(namespace) = self.lookup(key, source) {
            return namespace.into();
        }

        let namespace = Object::new();
        for name in source.own_enumerable_keys() {
            if name == DEFAULT {
                continue;
            }
            let Some(property) = source.own_property(&name) else {
                continue;
            };
            if property.is_accessor() {
                namespace.define_property(name, property);
            } else {
                namespace.set(name.clone(), source.get(&name));
            }
        }
        namespace.set(DEFAULT, obj.clone());

        self.store(key, source, &namespace);
        namespace.into()
    }

    /// Number of live memoized namespaces.
    pub fn cached_namespaces(&self) -> usize {
        self.namespaces
            .borrow()
            .values()
            .filter(|entry| entry.is_alive())
            .count()
    }

    fn lookup(&self, key: (usize, bool), source: &Object) -> Option<Object> {
        let namespaces = self.namespaces.borrow();
        let entry = namespaces.get(&key)?;
        // An address can be reused after the original object is dropped.
        let alive = entry.source.upgrade()?;
        if !alive.ptr_eq(source) {
            return None;
        }
        entry.namespace.upgrade()
    }

    fn store(&self, key: (usize, bool), source: &Object, namespace: &Object) {
        let mut namespaces = self.namespaces.borrow_mut();
        namespaces.retain(|_, entry| entry.is_alive());
        namespaces.insert(
            key,
            CachedNamespace {
                source: source.downgrade(),
                namespace: namespace.downgrade(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Function;
    use std::cell::Cell;
    use std::rc::Rc;

    fn esm(entries: &[(&str, i32)]) -> Object {
        let obj = Object::from_entries(entries.iter().copied());
        define_export_es_module(&obj);
        obj
    }

    #[test]
    fn test_require_default_wraps_cjs() {
        let cjs: Value = Object::from_entries([("a", 1)]).into();
        let wrapped = interop_require_default(&cjs);
        assert!(wrapped.get("default").strict_equals(&cjs));
    }

    #[test]
    fn test_require_default_passes_esm() {
        let module: Value = esm(&[("default", 1)]).into();
        assert!(interop_require_default(&module).strict_equals(&module));
    }

    #[test]
    fn test_es_module_flag_idempotent_and_hidden() {
        let obj = Object::new();
        define_export_es_module(&obj);
        define_export_es_module(&obj);
        assert_eq!(obj.own_keys(), vec![ES_MODULE_FLAG]);
        assert!(obj.own_enumerable_keys().is_empty());
        assert!(is_es_module(&obj.into()));
    }

    #[test]
    fn test_wildcard_esm_passthrough_unless_node_interop() {
        let interop = Interop::new();
        let module: Value = esm(&[("a", 1)]).into();

        assert!(interop
            .interop_require_wildcard(&module, false)
            .strict_equals(&module));

        let ns = interop.interop_require_wildcard(&module, true);
        assert!(!ns.strict_equals(&module));
        assert!(ns.get("default").strict_equals(&module));
    }

    #[test]
    fn test_wildcard_primitives_and_functions() {
        let interop = Interop::new();
        let ns = interop.interop_require_wildcard(&Value::from(42), false);
        assert_eq!(ns.get("default").as_number(), Some(42.0));

        let f: Value = Function::new(|_| Value::Null).into();
        let ns = interop.interop_require_wildcard(&f, false);
        assert!(ns.get("default").strict_equals(&f));
    }

    #[test]
    fn test_wildcard_copies_without_default() {
        let interop = Interop::new();
        let cjs = Object::from_entries([("default", 1), ("a", 2)]);
        cjs.define_property("hidden", Property::hidden(3));
        let cjs_value: Value = cjs.into();

        let ns = interop.interop_require_wildcard(&cjs_value, false);
        let ns_obj = ns.as_object().unwrap();
        assert_eq!(ns_obj.own_keys(), vec!["a", "default"]);
        assert!(ns.get("default").strict_equals(&cjs_value));
    }

    #[test]
    fn test_wildcard_keeps_getters_lazy() {
        let interop = Interop::new();
        let reads = Rc::new(Cell::new(0));
        let source = Object::new();
        let r = reads.clone();
        source.define_property(
            "lazy",
            Property::getter(move || {
                r.set(r.get() + 1);
                Value::from("value")
            }),
        );

        let ns = interop.interop_require_wildcard(&source.into(), false);
        assert_eq!(reads.get(), 0);
        assert_eq!(ns.get("lazy").as_str(), Some("value"));
        assert_eq!(reads.get(), 1);
    }

    #[test]
    fn test_wildcard_memoized_per_flag() {
        let interop = Interop::new();
        let cjs: Value = Object::from_entries([("a", 1)]).into();

        let first = interop.interop_require_wildcard(&cjs, false);
        let second = interop.interop_require_wildcard(&cjs, false);
        let node = interop.interop_require_wildcard(&cjs, true);

        assert!(first.strict_equals(&second));
        assert!(!first.strict_equals(&node));
        assert_eq!(interop.cached_namespaces(), 2);
    }

    #[test]
    fn test_wildcard_memo_does_not_outlive_sources() {
        let interop = Interop::new();
        for i in 0..100 {
            let cjs: Value = Object::from_entries([("i", i)]).into();
            interop.interop_require_wildcard(&cjs, false);
        }
        assert_eq!(interop.cached_namespaces(), 0);

        // A held namespace keeps its entry, and its source, alive.
        let ns = {
            let source: Value = Object::from_entries([("a", 1)]).into();
            interop.interop_require_wildcard(&source, false)
        };
        assert_eq!(interop.cached_namespaces(), 1);
        let source = ns.get("default");
        assert!(
            interop
                .interop_require_wildcard(&source, false)
                .strict_equals(&ns)
        );

        drop(ns);
        drop(source);
        assert_eq!(interop.cached_namespaces(), 0);
    }

    #[test]
    fn test_define_export_refuses_redefinition() {
        let to = Object::new();
        assert!(define_export(&to, "a", || Value::from(1)));
        assert!(!define_export(&to, "a", || Value::from(2)));
        assert_eq!(to.get("a").as_number(), Some(1.0));
    }

    #[test]
    fn test_define_export_from_is_live() {
        let source = Object::from_entries([("x", 1)]);
        let to = Object::new();
        define_export_from(&to, "y", &source.clone().into(), "x");

        source.set("x", 5);
        assert_eq!(to.get("y").as_number(), Some(5.0));
    }

    #[test]
    fn test_import_default() {
        let with_default: Value = Object::from_entries([("default", "d")]).into();
        assert_eq!(import_default(&with_default).as_str(), Some("d"));

        let without: Value = Object::from_entries([("a", 1)]).into();
        assert!(import_default(&without).strict_equals(&without));

        assert_eq!(import_default(&Value::from(3)).as_number(), Some(3.0));
    }
}
