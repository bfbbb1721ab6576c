//! Dynamic values exchanged between generated module code and the runtime.
//!
//! Exports objects need two properties plain maps don't give us: identity
//! (a captured `exports` must observe later mutations, and memo caches key by
//! object identity) and live bindings (an `export let` read through a getter
//! sees the current value, not a snapshot). [`Object`] is a shared property
//! table whose entries are either stored values or accessor getters evaluated
//! on every read.

use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Getter backing an accessor property.
pub type Getter = Rc<dyn Fn() -> Value>;

/// A dynamically typed value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Function(Function),
    Object(Object),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// JavaScript truthiness.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Function(_) | Value::Object(_) => true,
        }
    }

    /// Property read; non-objects have no properties.
    pub fn get(&self, key: &str) -> Value {
        match self {
            Value::Object(obj) => obj.get(key),
            _ => Value::Undefined,
        }
    }

    /// Same result as the `typeof` operator.
    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
            Value::Object(_) => "object",
        }
    }

    /// `===` semantics: identity for objects and functions.
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.strict_equals(other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Function(func) => fmt::Debug::fmt(func, f),
            Value::Object(obj) => fmt::Debug::fmt(obj, f),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Rc::from(s))
    }
}

impl From<Object> for Value {
    fn from(obj: Object) -> Self {
        Value::Object(obj)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

/// A callable value.
#[derive(Clone)]
pub struct Function(Rc<dyn Fn(&[Value]) -> Value>);

impl Function {
    pub fn new(f: impl Fn(&[Value]) -> Value + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.0)(args)
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Function {:p}]", Rc::as_ptr(&self.0) as *const ())
    }
}

/// How a property produces its value.
#[derive(Clone)]
pub enum Binding {
    /// Stored value
    Value(Value),
    /// Evaluated on each read
    Accessor(Getter),
}

/// A property descriptor.
#[derive(Clone)]
pub struct Property {
    pub binding: Binding,
    pub enumerable: bool,
    pub writable: bool,
    pub configurable: bool,
}

impl Property {
    /// Plain data property, as created by assignment.
    pub fn value(value: impl Into<Value>) -> Self {
        Self {
            binding: Binding::Value(value.into()),
            enumerable: true,
            writable: true,
            configurable: true,
        }
    }

    /// Enumerable, non-configurable getter (the shape of an ESM export).
    pub fn getter(getter: impl Fn() -> Value + 'static) -> Self {
        Self {
            binding: Binding::Accessor(Rc::new(getter)),
            enumerable: true,
            writable: false,
            configurable: false,
        }
    }

    /// Non-enumerable, read-only data property.
    pub fn hidden(value: impl Into<Value>) -> Self {
        Self {
            binding: Binding::Value(value.into()),
            enumerable: false,
            writable: false,
            configurable: false,
        }
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self.binding, Binding::Accessor(_))
    }

    fn read(&self) -> Value {
        match &self.binding {
            Binding::Value(v) => v.clone(),
            Binding::Accessor(getter) => getter(),
        }
    }
}

type PropertyMap = IndexMap<String, Property>;

/// Shared, identity-comparable property table in insertion order.
#[derive(Clone, Default)]
pub struct Object(Rc<RefCell<PropertyMap>>);

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an object from plain data properties.
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let obj = Object::new();
        for (key, value) in entries {
            obj.set(key, value);
        }
        obj
    }

    /// Read a property, running its getter if it has one.
    pub fn get(&self, key: &str) -> Value {
        // Clone the descriptor out first: a getter may read this same object.
        let property = self.0.borrow().get(key).cloned();
        property.map(|p| p.read()).unwrap_or_default()
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    /// Own descriptor, returned verbatim (getters are not evaluated).
    pub fn own_property(&self, key: &str) -> Option<Property> {
        self.0.borrow().get(key).cloned()
    }

    pub fn own_keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    /// Equivalent of `Object.keys`.
    pub fn own_enumerable_keys(&self) -> Vec<String> {
        self.0
            .borrow()
            .iter()
            .filter(|(_, p)| p.enumerable)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Assignment. Returns false when the property is read-only or an accessor.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        let mut props = self.0.borrow_mut();
        match props.get_mut(&key) {
            Some(existing) => {
                if !existing.writable {
                    return false;
                }
                match &mut existing.binding {
                    Binding::Value(slot) => {
                        *slot = value.into();
                        true
                    }
                    Binding::Accessor(_) => false,
                }
            }
            None => {
                props.insert(key, Property::value(value));
                true
            }
        }
    }

    /// `Object.defineProperty`; refuses to touch a non-configurable property.
    pub fn define_property(&self, key: impl Into<String>, property: Property) -> bool {
        let key = key.into();
        let mut props = self.0.borrow_mut();
        if props.get(&key).is_some_and(|p| !p.configurable) {
            return false;
        }
        props.insert(key, property);
        true
    }

    pub fn delete(&self, key: &str) -> bool {
        let mut props = self.0.borrow_mut();
        match props.get(key) {
            Some(p) if !p.configurable => false,
            Some(_) => {
                props.shift_remove(key);
                true
            }
            None => true,
        }
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address-based identity, stable for the object's lifetime.
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn downgrade(&self) -> WeakObject {
        WeakObject(Rc::downgrade(&self.0))
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Keys only: printing values would run getters.
        match self.0.try_borrow() {
            Ok(props) => f.debug_set().entries(props.keys()).finish(),
            Err(_) => f.write_str("{ <borrowed> }"),
        }
    }
}

/// Non-owning reference to an [`Object`].
#[derive(Clone)]
pub struct WeakObject(Weak<RefCell<PropertyMap>>);

impl WeakObject {
    pub fn upgrade(&self) -> Option<Object> {
        self.0.upgrade().map(Object)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}
