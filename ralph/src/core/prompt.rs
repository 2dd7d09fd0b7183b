//! Agent prompt and pull-request body rendering.

use anyhow::Result;
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::items::{Item, ItemSet};

const ITEM_TEMPLATE: &str = include_str!("templates/item.md");
const PR_BODY_TEMPLATE: &str = include_str!("templates/pr_body.md");

/// One row of the checkpoint table in a PR body.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CheckpointRow {
    pub title: String,
    pub short_sha: String,
    pub tests_passed: bool,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.add_template("item", ITEM_TEMPLATE)
            .expect("item template should be valid");
        env.add_template("pr_body", PR_BODY_TEMPLATE)
            .expect("pr body template should be valid");
        Self { env }
    }

    /// Task text handed to the agent for `item`.
    ///
    /// The index is the item's position in priority order.
    pub fn render_item(&self, set: &ItemSet, item: &Item) -> Result<String> {
        let index = set
            .items_by_priority()
            .iter()
            .position(|candidate| candidate.id == item.id)
            .map_or(0, |pos| pos + 1);
        let template = self.env.get_template("item")?;
        let rendered = template.render(context! {
            project => set.project.as_str(),
            goal => set.goal.as_str(),
            index => index,
            total => set.total_count(),
            item => item,
        })?;
        Ok(rendered)
    }

    pub fn render_pr_body(&self, set: &ItemSet, checkpoints: &[CheckpointRow]) -> Result<String> {
        let template = self.env.get_template("pr_body")?;
        let rendered = template.render(context! {
            project => set.project.as_str(),
            goal => set.goal.as_str(),
            completed => set.completed_count(),
            total => set.total_count(),
            items => &set.items,
            checkpoints => checkpoints,
            version => env!("CARGO_PKG_VERSION"),
        })?;
        Ok(rendered)
    }
}

pub fn pr_title(set: &ItemSet) -> String {
    format!("[Ralph] {}", set.project)
}
