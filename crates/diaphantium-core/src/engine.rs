//! The hook engine: observes supply and cooldown writes on the host prototype
//! and dispatches actions through the most recently seen supply objects.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, PoisonError, Weak},
};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    actions::ActionTable,
    category::{resolve_category, Category},
    cooldown::{CooldownPolicy, CooldownTracker},
    discovery::ScriptDiscovery,
    events::{EngineEvent, EventKind, EventLog, DEFAULT_EVENT_CAPACITY},
    extract::FieldIdentifier,
    host::{HostError, HostObject, HostValue, PropertyObserverInstaller, WriteHandler},
    registry::{Lookup, RegistryEntrySummary, SupplyRegistry},
};

/// Number of events included in [`DebugInfo`].
pub const DEBUG_EVENT_LIMIT: usize = 15;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub actions: ActionTable,
    pub exempt_category: Option<Category>,
    pub cooldown_policy: CooldownPolicy,
    /// Refuse to dispatch a category whose cooldown has not ended.
    pub skip_on_cooldown: bool,
    pub event_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            actions: ActionTable::default(),
            exempt_category: Some(Category::from("MINE")),
            cooldown_policy: CooldownPolicy::default(),
            skip_on_cooldown: true,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClickOutcome {
    /// The object's trigger ran.
    Dispatched,
    UnknownKey,
    /// Hooks are not installed; nothing can be registered.
    Inert,
    OnCooldown,
    NotRegistered,
    /// The registered object is gone or no longer has a single trigger; the
    /// entry was evicted.
    Stale,
    /// The trigger panicked.
    Failed,
}

impl ClickOutcome {
    pub fn is_dispatched(self) -> bool {
        matches!(self, Self::Dispatched)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub installed: bool,
    pub fields: Option<FieldIdentifier>,
    pub registry_size: usize,
    pub registry: Vec<RegistryEntrySummary>,
    pub active_cooldowns: Vec<Category>,
    pub recent_events: Vec<EngineEvent>,
}

/// State reachable from the property observers.
struct EngineState {
    registry: SupplyRegistry,
    cooldowns: CooldownTracker,
    events: EventLog,
    cooldown_policy: CooldownPolicy,
}

impl EngineState {
    fn on_supply_write(&self, this: &HostObject) {
        let Some(category) = resolve_category(this) else {
            debug!(
                target: "diaphantium_engine",
                object = %format_args!("{:#x}", this.id()),
                "supply write on object without a category"
            );
            return;
        };

        let functions = this.function_members().len();
        let replaced = self.registry.register(category.clone(), this);
        self.events.record(
            EventKind::Register,
            format!("{category} ({functions} function(s), replaced: {replaced})"),
        );

        for dead in self.registry.prune_dead() {
            self.retire(&dead, "object was dropped by the host");
        }
    }

    /// Evicts `category` and reconciles its cooldown under the configured
    /// policy.
    fn retire(&self, category: &Category, reason: &str) {
        self.registry.evict(category.as_str());
        self.cooldowns
            .reconcile_eviction(category.as_str(), self.cooldown_policy);
        warn!(
            target: "diaphantium_engine",
            %category,
            reason,
            policy = ?self.cooldown_policy,
            "evicted stale registration"
        );
        self.events.record(EventKind::Stale, format!("{category}: {reason}"));
    }

    fn on_cooldown_write(&self, this: &HostObject) {
        match resolve_category(this) {
            Some(category) => {
                let was_active = self.cooldowns.end(category.as_str());
                self.events.record(
                    EventKind::CooldownEnd,
                    format!("{category} (was active: {was_active})"),
                );
            }
            None => self.events.record(
                EventKind::CooldownMalformed,
                format!("no category on {:#x}", this.id()),
            ),
        }
    }
}

/// Intercepts the game's supply protocol and dispatches supply actions.
///
/// The engine holds no strong reference to any host object. Observers keep
/// only a weak link back to the engine, so dropping the engine turns them
/// into no-ops.
pub struct PacketEngine {
    state: Arc<EngineState>,
    installer: Arc<dyn PropertyObserverInstaller>,
    discovery: Option<ScriptDiscovery>,
    fields: Mutex<Option<FieldIdentifier>>,
    options: EngineOptions,
}

impl PacketEngine {
    pub fn new(installer: Arc<dyn PropertyObserverInstaller>, options: EngineOptions) -> Self {
        let state = EngineState {
            registry: SupplyRegistry::new(),
            cooldowns: CooldownTracker::new(options.exempt_category.clone()),
            events: EventLog::with_capacity(options.event_capacity),
            cooldown_policy: options.cooldown_policy,
        };
        Self {
            state: Arc::new(state),
            installer,
            discovery: None,
            fields: Mutex::new(None),
            options,
        }
    }

    #[must_use]
    pub fn with_discovery(mut self, discovery: ScriptDiscovery) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Discovers the field names and installs the observers. Returns `true`
    /// when the engine is (already or now) installed. Failure leaves the
    /// engine inert; it is reported through the event log only.
    pub async fn init(&self) -> bool {
        if self.is_installed() {
            return true;
        }

        let Some(discovery) = &self.discovery else {
            self.state
                .events
                .record(EventKind::InitFail, "no script discovery configured");
            return false;
        };

        let fields = match discovery.discover().await {
            Ok(fields) => fields,
            Err(error) => {
                self.state
                    .events
                    .record(EventKind::InitFail, format!("{:#}", anyhow::Error::new(error)));
                return false;
            }
        };

        self.state.events.record(
            EventKind::Init,
            format!(
                "supply field `{}`, cooldown field `{}`",
                fields.supply_field, fields.cooldown_field
            ),
        );

        match self.install(fields) {
            Ok(()) => true,
            Err(error) => {
                self.state
                    .events
                    .record(EventKind::InitFail, error.to_string());
                false
            }
        }
    }

    /// Installs the supply and cooldown observers. A second call while
    /// installed is a no-op.
    pub fn install(&self, fields: FieldIdentifier) -> Result<(), HostError> {
        let mut installed = self.fields.lock().unwrap_or_else(PoisonError::into_inner);
        if installed.is_some() {
            debug!(target: "diaphantium_engine", "observers already installed");
            return Ok(());
        }

        let weak = Arc::downgrade(&self.state);
        self.installer.observe(
            &fields.supply_field,
            observer(weak.clone(), EngineState::on_supply_write),
        )?;
        if let Err(error) = self.installer.observe(
            &fields.cooldown_field,
            observer(weak, EngineState::on_cooldown_write),
        ) {
            self.installer.unobserve(&fields.supply_field);
            return Err(error);
        }

        self.state.events.record(
            EventKind::Hooks,
            format!(
                "observing `{}` and `{}`",
                fields.supply_field, fields.cooldown_field
            ),
        );
        *installed = Some(fields);
        Ok(())
    }

    /// Removes both observers. Registry and cooldowns are left as they are.
    pub fn uninstall(&self) -> bool {
        let Some(fields) = self
            .fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };

        self.installer.unobserve(&fields.supply_field);
        self.installer.unobserve(&fields.cooldown_field);
        self.state.events.record(
            EventKind::Uninstall,
            format!(
                "stopped observing `{}` and `{}`",
                fields.supply_field, fields.cooldown_field
            ),
        );
        true
    }

    pub fn is_installed(&self) -> bool {
        self.fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn fields(&self) -> Option<FieldIdentifier> {
        self.fields
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Dispatches the action bound to `key`. Never panics; every failure is
    /// reported through the outcome and the event log.
    pub fn click_supply(&self, key: &str) -> ClickOutcome {
        let Some(category) = self.options.actions.category_for(key).cloned() else {
            debug!(target: "diaphantium_engine", key, "unknown action key");
            return ClickOutcome::UnknownKey;
        };
        if !self.is_installed() {
            return ClickOutcome::Inert;
        }

        let state = &self.state;
        let lookup = state.registry.lookup(category.as_str());
        if matches!(lookup, Lookup::Stale) {
            return self.evict(&category, "object was dropped by the host");
        }

        if self.options.skip_on_cooldown && !state.cooldowns.is_ready(category.as_str()) {
            state
                .events
                .record(EventKind::ClickSkip, format!("{category} is cooling down"));
            return ClickOutcome::OnCooldown;
        }

        let object = match lookup {
            Lookup::Live(object) => object,
            Lookup::Stale | Lookup::Missing => {
                state
                    .events
                    .record(EventKind::ClickFail, format!("{category} is not registered"));
                return ClickOutcome::NotRegistered;
            }
        };

        let functions = object.function_members();
        let [trigger] = functions.as_slice() else {
            let reason = format!("object exposes {} function(s)", functions.len());
            return self.evict(&category, &reason);
        };

        if panic::catch_unwind(AssertUnwindSafe(|| trigger.call(&object))).is_err() {
            state
                .events
                .record(EventKind::ClickFail, format!("{category} trigger panicked"));
            return ClickOutcome::Failed;
        }

        state.cooldowns.begin(&category);
        state.events.record(EventKind::Click, category.to_string());
        ClickOutcome::Dispatched
    }

    /// Whether `key` may be dispatched right now. Registration is not
    /// considered; unknown keys and an uninstalled engine are never ready.
    pub fn is_ready(&self, key: &str) -> bool {
        if !self.is_installed() {
            return false;
        }
        self.options
            .actions
            .category_for(key)
            .is_some_and(|category| self.state.cooldowns.is_ready(category.as_str()))
    }

    /// Forgets every registered object and every cooldown.
    pub fn reset(&self) {
        self.state.registry.clear();
        self.state.cooldowns.clear();
        self.state.events.record(EventKind::Reset, "registry and cooldowns cleared");
    }

    pub fn debug_info(&self) -> DebugInfo {
        DebugInfo {
            installed: self.is_installed(),
            fields: self.fields(),
            registry_size: self.state.registry.len(),
            registry: self.state.registry.summary(),
            active_cooldowns: self.state.cooldowns.active(),
            recent_events: self.state.events.recent(DEBUG_EVENT_LIMIT),
        }
    }

    /// Full event history, oldest first.
    pub fn events(&self) -> Vec<EngineEvent> {
        self.state.events.snapshot()
    }

    fn evict(&self, category: &Category, reason: &str) -> ClickOutcome {
        let state = &self.state;
        state.retire(category, reason);
        state
            .events
            .record(EventKind::ClickFail, format!("{category} registration was stale"));
        ClickOutcome::Stale
    }
}

fn observer(state: Weak<EngineState>, on_write: fn(&EngineState, &HostObject)) -> WriteHandler {
    Arc::new(move |this: &HostObject, _value: &HostValue| {
        if let Some(state) = state.upgrade() {
            on_write(&state, this);
        }
    })
}
