use dashmap::DashMap;
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    category::Category,
    host::{HostObject, WeakHostObject},
};

/// Weak, observational link to the latest host object of one category.
#[derive(Debug, Clone)]
pub struct TrackedObject {
    handle: WeakHostObject,
    object_id: usize,
    pub registered_at: OffsetDateTime,
}

impl TrackedObject {
    fn new(object: &HostObject) -> Self {
        Self {
            handle: object.downgrade(),
            object_id: object.id(),
            registered_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn upgrade(&self) -> Option<HostObject> {
        self.handle.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.handle.is_alive()
    }
}

/// Result of looking a category up in the registry.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// The host object is still alive.
    Live(HostObject),
    /// An entry exists but the host has dropped its object.
    Stale,
    Missing,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RegistryEntrySummary {
    pub category: Category,
    pub alive: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub registered_at: OffsetDateTime,
}

/// Most recently observed object per category.
///
/// Keyed by category, so its size is bounded by the number of categories the
/// game uses no matter how often it replaces its objects.
#[derive(Debug, Default)]
pub struct SupplyRegistry {
    entries: DashMap<Category, TrackedObject>,
}

impl SupplyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `object` as the live object for `category`. Returns `true`
    /// when a different object was superseded.
    pub fn register(&self, category: Category, object: &HostObject) -> bool {
        let tracked = TrackedObject::new(object);
        match self.entries.insert(category, tracked) {
            Some(previous) => previous.object_id != object.id() || !previous.is_alive(),
            None => false,
        }
    }

    pub fn lookup(&self, category: &str) -> Lookup {
        let Some(tracked) = self.entries.get(category).map(|entry| entry.value().clone()) else {
            return Lookup::Missing;
        };
        match tracked.upgrade() {
            Some(object) => Lookup::Live(object),
            None => Lookup::Stale,
        }
    }

    pub fn contains(&self, category: &str) -> bool {
        self.entries.contains_key(category)
    }

    pub fn evict(&self, category: &str) -> bool {
        self.entries.remove(category).is_some()
    }

    /// Drops entries whose host object is gone; returns their categories,
    /// sorted.
    pub fn prune_dead(&self) -> Vec<Category> {
        let mut pruned = Vec::new();
        self.entries.retain(|category, tracked| {
            let alive = tracked.is_alive();
            if !alive {
                pruned.push(category.clone());
            }
            alive
        });
        pruned.sort();
        pruned
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered categories, sorted.
    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<Category> =
            self.entries.iter().map(|entry| entry.key().clone()).collect();
        categories.sort();
        categories
    }

    pub fn summary(&self) -> Vec<RegistryEntrySummary> {
        let mut summary: Vec<RegistryEntrySummary> = self
            .entries
            .iter()
            .map(|entry| RegistryEntrySummary {
                category: entry.key().clone(),
                alive: entry.value().is_alive(),
                registered_at: entry.value().registered_at,
            })
            .collect();
        summary.sort_by(|a, b| a.category.cmp(&b.category));
        summary
    }
}
