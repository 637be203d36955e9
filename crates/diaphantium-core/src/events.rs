use std::{
    collections::VecDeque,
    fmt,
    sync::{Mutex, PoisonError},
};

use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub const DEFAULT_EVENT_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    Init,
    InitFail,
    Hooks,
    Register,
    CooldownEnd,
    CooldownMalformed,
    Click,
    ClickSkip,
    ClickFail,
    Stale,
    Reset,
    Uninstall,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::InitFail => "init-fail",
            Self::Hooks => "hooks",
            Self::Register => "register",
            Self::CooldownEnd => "cooldown-end",
            Self::CooldownMalformed => "cooldown-malformed",
            Self::Click => "click",
            Self::ClickSkip => "click-skip",
            Self::ClickFail => "click-fail",
            Self::Stale => "stale",
            Self::Reset => "reset",
            Self::Uninstall => "uninstall",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

/// Bounded history of what the engine observed, newest last.
#[derive(Debug)]
pub struct EventLog {
    entries: Mutex<VecDeque<EngineEvent>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&self, kind: EventKind, detail: impl Into<String>) {
        let detail = detail.into();
        match kind {
            EventKind::InitFail | EventKind::ClickFail | EventKind::Stale => {
                warn!(target: "diaphantium_engine", event = %kind, %detail);
            }
            EventKind::Init | EventKind::Hooks | EventKind::Reset | EventKind::Uninstall => {
                info!(target: "diaphantium_engine", event = %kind, %detail);
            }
            _ => debug!(target: "diaphantium_engine", event = %kind, %detail),
        }

        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push_back(EngineEvent {
            timestamp: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
        while entries.len() > self.capacity {
            entries.pop_front();
        }
    }

    /// The last `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<EngineEvent> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<EngineEvent> {
        self.recent(usize::MAX)
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.kind == kind)
            .count()
    }
}
