//! Item set (PRD) load/save with schema + invariant validation.

use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use jsonschema::{Draft, Validator};
use serde_json::Value;
use tracing::debug;

use crate::core::items::{ItemSet, validate_item_set};
use crate::error::RalphError;

const ITEM_SET_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/schemas/item_set.schema.json"
));

static VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
    let schema: Value =
        serde_json::from_str(ITEM_SET_SCHEMA).expect("item set schema should be valid json");
    jsonschema::options()
        .with_draft(Draft::Draft202012)
        .build(&schema)
        .expect("item set schema should compile")
});

/// Load and validate an item set from disk (schema, then invariants).
///
/// Any content problem is reported as [`RalphError::InvalidItemSet`] listing
/// every violation found.
pub fn load_item_set(path: &Path) -> Result<ItemSet> {
    debug!(path = %path.display(), "loading item set");
    let invalid = |message: String| RalphError::InvalidItemSet {
        path: path.to_path_buf(),
        message,
    };
    let contents = fs::read_to_string(path).map_err(|err| invalid(err.to_string()))?;
    parse_item_set(&contents).map_err(|message| invalid(message).into())
}

/// Validate raw JSON text into an item set; errors are human-readable.
pub fn parse_item_set(contents: &str) -> std::result::Result<ItemSet, String> {
    let value: Value = serde_json::from_str(contents).map_err(|err| err.to_string())?;
    let messages: Vec<String> = VALIDATOR
        .iter_errors(&value)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(messages.join("; "));
    }
    let set: ItemSet = serde_json::from_value(value).map_err(|err| err.to_string())?;
    let errors = validate_item_set(&set);
    if !errors.is_empty() {
        return Err(errors.join("; "));
    }
    Ok(set)
}

/// Atomically write the item set as pretty JSON with a trailing newline.
pub fn write_item_set(path: &Path, set: &ItemSet) -> Result<()> {
    debug!(path = %path.display(), progress = %set.progress(), "writing item set");
    let mut buf = serde_json::to_string_pretty(set).context("serialize item set")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}
