//! Item model (PRD) and deterministic Item Store queries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One unit of work handed to the agent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Item {
    pub id: u32,
    pub category: String,
    pub title: String,
    pub description: String,
    /// Lower is more urgent.
    pub priority: i64,
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub verification: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub notes: String,
}

/// Operator-configured commands run around each checkpoint.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Hooks {
    pub pre_commit: Vec<String>,
    pub post_item: Vec<String>,
}

impl Hooks {
    pub fn is_empty(&self) -> bool {
        self.pre_commit.is_empty() && self.post_item.is_empty()
    }
}

/// Ordered collection of items plus project metadata (the PRD file).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ItemSet {
    pub project: String,
    pub goal: String,
    #[serde(default)]
    pub tech_stack: Map<String, Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default, skip_serializing_if = "Hooks::is_empty")]
    pub hooks: Hooks,
}

impl ItemSet {
    /// Items ordered by `(priority, id)`.
    pub fn items_by_priority(&self) -> Vec<&Item> {
        let mut items: Vec<&Item> = self.items.iter().collect();
        items.sort_by_key(|item| (item.priority, item.id));
        items
    }

    /// The incomplete item with the lowest `(priority, id)`, or `None` when
    /// every item passes.
    pub fn next_item(&self) -> Option<&Item> {
        self.items
            .iter()
            .filter(|item| !item.passes)
            .min_by_key(|item| (item.priority, item.id))
    }

    /// Item to work on next: the assigned item while it is still incomplete,
    /// otherwise [`ItemSet::next_item`].
    pub fn select_item(&self, assigned: Option<u32>) -> Option<&Item> {
        assigned
            .and_then(|id| self.item(id))
            .filter(|item| !item.passes)
            .or_else(|| self.next_item())
    }

    pub fn item(&self, id: u32) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn item_mut(&mut self, id: u32) -> Option<&mut Item> {
        self.items.iter_mut().find(|item| item.id == id)
    }

    /// Set `passes = true`. Returns false if the item does not exist.
    pub fn mark_complete(&mut self, id: u32) -> bool {
        self.set_passes(id, true)
    }

    /// Set `passes = false`. Returns false if the item does not exist.
    pub fn mark_incomplete(&mut self, id: u32) -> bool {
        self.set_passes(id, false)
    }

    fn set_passes(&mut self, id: u32, passes: bool) -> bool {
        match self.item_mut(id) {
            Some(item) => {
                item.passes = passes;
                true
            }
            None => false,
        }
    }

    pub fn completed_count(&self) -> usize {
        self.items.iter().filter(|item| item.passes).count()
    }

    pub fn total_count(&self) -> usize {
        self.items.len()
    }

    pub fn remaining_count(&self) -> usize {
        self.total_count() - self.completed_count()
    }

    /// `completed/total`, e.g. `2/3`.
    pub fn progress(&self) -> String {
        format!("{}/{}", self.completed_count(), self.total_count())
    }

    /// Language/framework summary from `tech_stack`, if present.
    pub fn stack_summary(&self) -> Option<String> {
        let field = |key: &str| {
            self.tech_stack
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let summary = format!("{} / {}", field("language"), field("framework"));
        let summary = summary.trim_matches(|c: char| c == ' ' || c == '/').to_string();
        (!summary.is_empty()).then_some(summary)
    }
}

/// Semantic checks that the JSON Schema cannot express.
///
/// Returns human-readable violations; empty means valid.
pub fn validate_item_set(set: &ItemSet) -> Vec<String> {
    let mut errors = Vec::new();
    if set.project.trim().is_empty() {
        errors.push("project must not be empty".to_string());
    }
    let mut seen = std::collections::BTreeSet::new();
    for item in &set.items {
        if !seen.insert(item.id) {
            errors.push(format!("duplicate item id {}", item.id));
        }
    }
    errors
}
