//! Recovers the obfuscated field names from the game bundle's source text.
//!
//! The bundle is rebuilt with fresh identifiers on every release, but the
//! `toString` implementations of two message classes survive minification:
//! `ConfigureSupplyMessage(type=…, count=…)` and
//! `StopCooldownMessage(supplyType=…)`. The field accesses inside those
//! string templates name the properties the engine has to observe.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[allow(clippy::expect_used)]
static CONFIGURE_SUPPLY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"ConfigureSupplyMessage\(type=.+?this\.(\w+)(?:\.toString\(\))?\s*\+.+?count=.+?this\.(\w+)",
    )
    .expect("configure-supply pattern compiles")
});

#[allow(clippy::expect_used)]
static STOP_COOLDOWN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"StopCooldownMessage\(supplyType=.+?this\.(\w+)(?:\.toString\(\))?")
        .expect("stop-cooldown pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ConfigureSupply,
    StopCooldown,
}

impl MessageKind {
    pub fn class_name(self) -> &'static str {
        match self {
            Self::ConfigureSupply => "ConfigureSupplyMessage",
            Self::StopCooldown => "StopCooldownMessage",
        }
    }

    fn pattern(self) -> (&'static Regex, usize) {
        match self {
            // The second access carries the supply data (the `count=` part).
            Self::ConfigureSupply => (&CONFIGURE_SUPPLY, 2),
            Self::StopCooldown => (&STOP_COOLDOWN, 1),
        }
    }
}

/// The two per-build property names the engine hooks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldIdentifier {
    pub supply_field: String,
    pub cooldown_field: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("bundle does not contain the expected call sites (supply field: {supply}, cooldown field: {cooldown})")]
pub struct ExtractError {
    pub supply: FieldStatus,
    pub cooldown: FieldStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldStatus {
    Found,
    Missing,
}

impl std::fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Found => "found",
            Self::Missing => "missing",
        })
    }
}

/// Returns the field name referenced by the `kind` call site, if present.
pub fn extract_field_name(source: &str, kind: MessageKind) -> Option<String> {
    let (regex, group) = kind.pattern();
    regex
        .captures(source)
        .and_then(|captures| captures.get(group))
        .map(|field| field.as_str().to_string())
}

/// Extracts both field names; succeeds only when both are found.
pub fn extract_fields(source: &str) -> Result<FieldIdentifier, ExtractError> {
    let supply = extract_field_name(source, MessageKind::ConfigureSupply);
    let cooldown = extract_field_name(source, MessageKind::StopCooldown);

    match (supply, cooldown) {
        (Some(supply_field), Some(cooldown_field)) => Ok(FieldIdentifier {
            supply_field,
            cooldown_field,
        }),
        (supply, cooldown) => Err(ExtractError {
            supply: status(supply.is_some()),
            cooldown: status(cooldown.is_some()),
        }),
    }
}

fn status(found: bool) -> FieldStatus {
    if found {
        FieldStatus::Found
    } else {
        FieldStatus::Missing
    }
}
