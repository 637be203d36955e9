//! In-process model of the host program's object graph.
//!
//! Objects are shared handles with reference identity and an ordered list of
//! own enumerable properties. Writes to a key that is not an own property are
//! routed through the accessors installed on the object's shared
//! [`ObjectPrototype`], which is how the engine observes fields whose names it
//! only learns at runtime.

mod prototype;

pub use prototype::{HostError, ObjectPrototype, PropertyObserverInstaller, WriteHandler};

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock, Weak},
};

/// A callable member of a host object, always invoked bound to an object.
#[derive(Clone)]
pub struct HostFunction(Arc<dyn Fn(&HostObject) + Send + Sync>);

impl HostFunction {
    pub fn new(function: impl Fn(&HostObject) + Send + Sync + 'static) -> Self {
        Self(Arc::new(function))
    }

    pub fn call(&self, this: &HostObject) {
        (self.0)(this);
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostFunction")
    }
}

#[derive(Clone, Debug, Default)]
pub enum HostValue {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Object(HostObject),
    Function(HostFunction),
}

impl HostValue {
    pub fn function(function: impl Fn(&HostObject) + Send + Sync + 'static) -> Self {
        Self::Function(HostFunction::new(function))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostObject> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&HostFunction> {
        match self {
            Self::Function(function) => Some(function),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<HostObject> for HostValue {
    fn from(value: HostObject) -> Self {
        Self::Object(value)
    }
}

impl From<&HostObject> for HostValue {
    fn from(value: &HostObject) -> Self {
        Self::Object(value.clone())
    }
}

impl From<HostFunction> for HostValue {
    fn from(value: HostFunction) -> Self {
        Self::Function(value)
    }
}

struct ObjectInner {
    prototype: Option<Arc<ObjectPrototype>>,
    properties: RwLock<Vec<(String, HostValue)>>,
}

/// Shared handle to an object owned by the host program.
#[derive(Clone)]
pub struct HostObject {
    inner: Arc<ObjectInner>,
}

impl HostObject {
    /// Creates an object whose unknown keys resolve through `prototype`.
    pub fn new(prototype: &Arc<ObjectPrototype>) -> Self {
        Self::from_parts(Some(Arc::clone(prototype)))
    }

    /// Creates an object without a prototype; no accessor ever fires for it.
    pub fn detached() -> Self {
        Self::from_parts(None)
    }

    fn from_parts(prototype: Option<Arc<ObjectPrototype>>) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                prototype,
                properties: RwLock::new(Vec::new()),
            }),
        }
    }

    /// Literal-style builder: defines an own property without consulting the
    /// prototype, like a key written in an object literal.
    #[must_use]
    pub fn with(self, key: &str, value: impl Into<HostValue>) -> Self {
        self.define(key, value);
        self
    }

    /// Identity of the object, stable for as long as it is alive.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn prototype(&self) -> Option<&Arc<ObjectPrototype>> {
        self.inner.prototype.as_ref()
    }

    pub fn has_own(&self, key: &str) -> bool {
        self.read_properties(|props| props.iter().any(|(name, _)| name == key))
    }

    pub fn get_own(&self, key: &str) -> Option<HostValue> {
        self.read_properties(|props| {
            props
                .iter()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.clone())
        })
    }

    /// Property read: own property first, then the prototype accessor.
    pub fn get(&self, key: &str) -> HostValue {
        if let Some(value) = self.get_own(key) {
            return value;
        }
        self.prototype()
            .and_then(|prototype| prototype.accessor(key))
            .map(|accessor| accessor.read(self))
            .unwrap_or_default()
    }

    /// Property write. A key that is not an own property and has an accessor
    /// on the prototype runs the accessor's setter with `self` as `this`.
    pub fn set(&self, key: &str, value: impl Into<HostValue>) {
        let value = value.into();
        if !self.has_own(key) {
            if let Some(accessor) = self.prototype().and_then(|prototype| prototype.accessor(key)) {
                accessor.write(self, value);
                return;
            }
        }
        self.define(key, value);
    }

    /// Defines or overwrites an own property, keeping its enumeration slot.
    pub fn define(&self, key: &str, value: impl Into<HostValue>) {
        let value = value.into();
        let mut props = self
            .inner
            .properties
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match props.iter_mut().find(|(name, _)| name == key) {
            Some((_, slot)) => *slot = value,
            None => props.push((key.to_string(), value)),
        }
    }

    pub fn remove(&self, key: &str) -> Option<HostValue> {
        let mut props = self
            .inner
            .properties
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let index = props.iter().position(|(name, _)| name == key)?;
        Some(props.remove(index).1)
    }

    /// Snapshot of own enumerable properties in enumeration order.
    pub fn own_entries(&self) -> Vec<(String, HostValue)> {
        self.read_properties(<[(String, HostValue)]>::to_vec)
    }

    pub fn own_values(&self) -> Vec<HostValue> {
        self.read_properties(|props| props.iter().map(|(_, value)| value.clone()).collect())
    }

    /// Own function-valued properties, in enumeration order.
    pub fn function_members(&self) -> Vec<HostFunction> {
        self.read_properties(|props| {
            props
                .iter()
                .filter_map(|(_, value)| value.as_function().cloned())
                .collect()
        })
    }

    pub fn downgrade(&self) -> WeakHostObject {
        WeakHostObject {
            inner: Arc::downgrade(&self.inner),
        }
    }

    fn read_properties<R>(&self, read: impl FnOnce(&[(String, HostValue)]) -> R) -> R {
        let props = self
            .inner
            .properties
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        read(&props)
    }
}

impl fmt::Debug for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.read_properties(|props| {
            props.iter().map(|(name, _)| name.clone()).collect()
        });
        f.debug_struct("HostObject")
            .field("id", &format_args!("{:#x}", self.id()))
            .field("keys", &keys)
            .finish()
    }
}

/// Non-owning handle; the host stays free to drop the object.
#[derive(Clone, Debug)]
pub struct WeakHostObject {
    inner: Weak<ObjectInner>,
}

impl WeakHostObject {
    pub fn upgrade(&self) -> Option<HostObject> {
        self.inner.upgrade().map(|inner| HostObject { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}
