//! Category resolution for observed host objects.
//!
//! The game never tells us what an object is. The only hint is an enum
//! constant such as `FIRST_AID` stored somewhere in the object's graph, so
//! the first string made of capitals and underscores that a depth-first walk
//! reaches is taken as the category. Any other all-caps string that happens
//! to be enumerated earlier wins instead; that is a known limit of the
//! heuristic and is kept as is.

use std::{borrow::Borrow, collections::HashSet, fmt};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::host::{HostObject, HostValue};

#[allow(clippy::expect_used)]
static CATEGORY_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Z_]+$").expect("category pattern compiles"));

/// Semantic label of an in-game action, e.g. `FIRST_AID`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Category(String);

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `value` has the shape of a category constant.
    pub fn matches(value: &str) -> bool {
        CATEGORY_PATTERN.is_match(value)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Category {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Category {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Finds the category of `object` by scanning its reachable properties.
///
/// Walks own enumerable properties depth first in enumeration order and
/// returns the first matching string. Objects already visited are skipped,
/// so cyclic graphs terminate; the walk keeps its own stack so graph depth is
/// not limited by the thread's stack.
pub fn resolve_category(object: &HostObject) -> Option<Category> {
    let mut visited = HashSet::new();
    visited.insert(object.id());
    let mut stack = vec![object.own_values().into_iter()];

    while let Some(frame) = stack.last_mut() {
        let Some(value) = frame.next() else {
            stack.pop();
            continue;
        };

        match value {
            HostValue::Str(text) if Category::matches(&text) => return Some(Category(text)),
            HostValue::Object(child) => {
                if visited.insert(child.id()) {
                    stack.push(child.own_values().into_iter());
                }
            }
            _ => {}
        }
    }

    None
}
