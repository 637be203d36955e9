use serde::{Deserialize, Serialize};

use crate::category::Category;

/// One row of the action table: the key the UI sends and its category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionBinding {
    pub key: String,
    pub category: Category,
}

/// Fixed lookup from UI action keys to supply categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionTable {
    bindings: Vec<ActionBinding>,
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::new([
            ("1", "FIRST_AID"),
            ("2", "DOUBLE_ARMOR"),
            ("3", "DOUBLE_DAMAGE"),
            ("4", "NITRO"),
            ("5", "MINE"),
        ])
    }
}

impl ActionTable {
    pub fn new<'a>(bindings: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            bindings: bindings
                .into_iter()
                .map(|(key, category)| ActionBinding {
                    key: key.to_string(),
                    category: Category::from(category),
                })
                .collect(),
        }
    }

    pub fn category_for(&self, key: &str) -> Option<&Category> {
        self.bindings
            .iter()
            .find(|binding| binding.key == key)
            .map(|binding| &binding.category)
    }

    pub fn key_for(&self, category: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|binding| binding.category.as_str() == category)
            .map(|binding| binding.key.as_str())
    }

    pub fn entries(&self) -> &[ActionBinding] {
        &self.bindings
    }
}
