// kegr-core/src/formulae/mod.rs
// Recipes compiled into kegr.

use std::fs;
use std::path::Path;

use kegr_common::error::{KegrError, Result};
use kegr_common::model::Formula;
use tracing::debug;

use crate::pipeline::Recipe;

pub mod r_cairo;

/// Names of every built-in recipe.
pub fn names() -> Vec<&'static str> {
    vec![r_cairo::NAME]
}

pub fn lookup(name: &str) -> Result<Recipe> {
    match name {
        r_cairo::NAME => Ok(r_cairo::recipe()),
        other => Err(KegrError::NotFound(format!(
            "No formula named '{}' (available: {})",
            other,
            names().join(", ")
        ))),
    }
}

/// Reads a formula descriptor from a JSON file. Descriptors carry metadata
/// only; their lifecycle steps come from the built-in recipe of that name.
pub fn load_descriptor(path: &Path) -> Result<Formula> {
    debug!("Loading formula descriptor {}", path.display());
    let content = fs::read_to_string(path).map_err(|e| {
        KegrError::NotFound(format!("Cannot read formula descriptor {}: {}", path.display(), e))
    })?;
    let formula: Formula = serde_json::from_str(&content)?;
    Ok(formula)
}
