use dashmap::DashSet;
use serde::{Deserialize, Serialize};

use crate::category::Category;

/// What to do with cooldowns when a stale registration is evicted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CooldownPolicy {
    /// Forget only the evicted category's cooldown.
    #[default]
    ClearCategory,
    /// Forget every cooldown; the state of the surviving objects is unknown.
    ClearAll,
    /// Leave cooldowns untouched and wait for the game to end them.
    Keep,
}

/// Categories dispatched and not yet reported as available again.
#[derive(Debug)]
pub struct CooldownTracker {
    active: DashSet<Category>,
    exempt: Option<Category>,
}

impl CooldownTracker {
    pub fn new(exempt: Option<Category>) -> Self {
        Self {
            active: DashSet::new(),
            exempt,
        }
    }

    pub fn is_exempt(&self, category: &str) -> bool {
        self.exempt
            .as_ref()
            .is_some_and(|exempt| exempt.as_str() == category)
    }

    pub fn is_ready(&self, category: &str) -> bool {
        self.is_exempt(category) || !self.active.contains(category)
    }

    /// Marks `category` as cooling down. The exempt category is never tracked.
    pub fn begin(&self, category: &Category) -> bool {
        if self.is_exempt(category.as_str()) {
            return false;
        }
        self.active.insert(category.clone())
    }

    /// Ends the cooldown of `category`; returns whether it was active.
    pub fn end(&self, category: &str) -> bool {
        self.active.remove(category).is_some()
    }

    /// Applies `policy` after `category` was found stale.
    pub fn reconcile_eviction(&self, category: &str, policy: CooldownPolicy) {
        match policy {
            CooldownPolicy::ClearCategory => {
                self.end(category);
            }
            CooldownPolicy::ClearAll => self.clear(),
            CooldownPolicy::Keep => {}
        }
    }

    pub fn clear(&self) {
        self.active.clear();
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Active cooldowns, sorted.
    pub fn active(&self) -> Vec<Category> {
        let mut active: Vec<Category> = self.active.iter().map(|entry| entry.key().clone()).collect();
        active.sort();
        active
    }
}
