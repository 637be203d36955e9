use std::{
    collections::HashMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, PoisonError, RwLock},
};

use thiserror::Error;
use tracing::{debug, error};

use super::{HostObject, HostValue};

/// Callback run for every observed write: the receiving object and the value.
pub type WriteHandler = Arc<dyn Fn(&HostObject, &HostValue) + Send + Sync>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("`{0}` is not a valid property name")]
    InvalidField(String),
}

/// Capability to observe writes to a dynamically named field on every object
/// sharing one prototype.
pub trait PropertyObserverInstaller: Send + Sync {
    /// Installs (or replaces) the observer for `field`.
    fn observe(&self, field: &str, on_write: WriteHandler) -> Result<(), HostError>;

    /// Removes the observer for `field`; returns whether one was installed.
    fn unobserve(&self, field: &str) -> bool;
}

pub(crate) struct Accessor {
    field: String,
    shadow_key: String,
    on_write: WriteHandler,
}

impl Accessor {
    pub(crate) fn read(&self, this: &HostObject) -> HostValue {
        this.get_own(&self.shadow_key).unwrap_or_default()
    }

    /// Stores the value under the shadow key, then notifies the observer.
    /// Never unwinds into the caller: the host invokes this inline.
    pub(crate) fn write(&self, this: &HostObject, value: HostValue) {
        this.define(&self.shadow_key, value.clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.on_write)(this, &value)));
        if outcome.is_err() {
            error!(
                target: "diaphantium_host",
                field = %self.field,
                object = %format_args!("{:#x}", this.id()),
                "property observer panicked; write kept"
            );
        }
    }
}

/// The prototype shared by every object of the host program.
#[derive(Default)]
pub struct ObjectPrototype {
    accessors: RwLock<HashMap<String, Arc<Accessor>>>,
}

impl ObjectPrototype {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Key under which an observed field's value is actually stored.
    pub fn shadow_key(field: &str) -> String {
        format!("__{field}")
    }

    pub fn observed_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .accessors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        fields.sort();
        fields
    }

    pub(crate) fn accessor(&self, field: &str) -> Option<Arc<Accessor>> {
        self.accessors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(field)
            .cloned()
    }
}

impl PropertyObserverInstaller for ObjectPrototype {
    fn observe(&self, field: &str, on_write: WriteHandler) -> Result<(), HostError> {
        if !is_identifier(field) {
            return Err(HostError::InvalidField(field.to_string()));
        }

        let accessor = Arc::new(Accessor {
            field: field.to_string(),
            shadow_key: Self::shadow_key(field),
            on_write,
        });
        let replaced = self
            .accessors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(field.to_string(), accessor)
            .is_some();
        debug!(target: "diaphantium_host", field, replaced, "installed property observer");
        Ok(())
    }

    fn unobserve(&self, field: &str) -> bool {
        self.accessors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(field)
            .is_some()
    }
}

impl fmt::Debug for ObjectPrototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPrototype")
            .field("observed", &self.observed_fields())
            .finish()
    }
}

fn is_identifier(field: &str) -> bool {
    let mut chars = field.chars();
    match chars.next() {
        Some(first) if first.is_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recording(log: &Arc<Mutex<Vec<String>>>) -> WriteHandler {
        let log = Arc::clone(log);
        Arc::new(move |_this, value| {
            log.lock()
                .unwrap()
                .push(value.as_str().unwrap_or("<non-string>").to_string());
        })
    }

    #[test]
    fn observed_write_is_shadowed_and_reported() {
        let prototype = ObjectPrototype::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        prototype.observe("k7", recording(&log)).unwrap();

        let object = HostObject::new(&prototype);
        object.set("k7", "NITRO");

        assert_eq!(*log.lock().unwrap(), vec!["NITRO".to_string()]);
        assert!(!object.has_own("k7"));
        assert_eq!(object.get_own("__k7").and_then(|v| v.as_str().map(str::to_string)), Some("NITRO".into()));
        assert_eq!(object.get("k7").as_str(), Some("NITRO"));

        object.set("k7", "MINE");
        assert_eq!(log.lock().unwrap().len(), 2, "every write is observed");
    }

    #[test]
    fn own_property_bypasses_accessor() {
        let prototype = ObjectPrototype::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        prototype.observe("k7", recording(&log)).unwrap();

        let object = HostObject::new(&prototype).with("k7", "literal");
        object.set("k7", "NITRO");

        assert!(log.lock().unwrap().is_empty());
        assert_eq!(object.get("k7").as_str(), Some("NITRO"));
    }

    #[test]
    fn detached_objects_are_never_observed() {
        let prototype = ObjectPrototype::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        prototype.observe("k7", recording(&log)).unwrap();

        let object = HostObject::detached();
        object.set("k7", "NITRO");
        assert!(log.lock().unwrap().is_empty());
        assert!(object.has_own("k7"));
    }

    #[test]
    fn panicking_observer_does_not_unwind_into_host() {
        let prototype = ObjectPrototype::new();
        prototype
            .observe("k7", Arc::new(|_, _| panic!("observer bug")))
            .unwrap();

        let object = HostObject::new(&prototype);
        object.set("k7", "FIRST_AID");
        assert_eq!(object.get("k7").as_str(), Some("FIRST_AID"));
    }

    #[test]
    fn unobserve_restores_plain_writes() {
        let prototype = ObjectPrototype::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        prototype.observe("k7", recording(&log)).unwrap();
        assert!(prototype.unobserve("k7"));
        assert!(!prototype.unobserve("k7"));

        let object = HostObject::new(&prototype);
        object.set("k7", "NITRO");
        assert!(log.lock().unwrap().is_empty());
        assert!(object.has_own("k7"));
    }

    #[test]
    fn rejects_invalid_field_names() {
        let prototype = ObjectPrototype::new();
        let handler: WriteHandler = Arc::new(|_, _| {});
        assert_eq!(
            prototype.observe("", Arc::clone(&handler)),
            Err(HostError::InvalidField(String::new()))
        );
        assert!(prototype.observe("9abc", Arc::clone(&handler)).is_err());
        assert!(prototype.observe("a.b", Arc::clone(&handler)).is_err());
        assert!(prototype.observe("$x_1", handler).is_ok());
        assert_eq!(prototype.observed_fields(), vec!["$x_1".to_string()]);
    }
}
