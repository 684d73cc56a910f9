//! Recorded outcome sets under `.reconciler/expectations/<n>.json`.
//!
//! A pass records what it expects to observe next time; the following pass
//! verifies and then clears the record.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::predict::OutcomeSet;
use crate::io::write_json;

pub fn expectations_path(dir: &Path, item: u64) -> PathBuf {
    dir.join(format!("{item}.json"))
}

/// Load the recorded outcome set for `item`, if any.
pub fn load_expectations(dir: &Path, item: u64) -> Result<Option<OutcomeSet>> {
    let path = expectations_path(dir, item);
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("read expectations {}", path.display()))?;
    let set: OutcomeSet = serde_json::from_str(&contents)
        .with_context(|| format!("parse expectations {}", path.display()))?;
    debug!(item, outcomes = set.outcomes.len(), "expectations loaded");
    Ok(Some(set))
}

/// Atomically write the outcome set for its item (temp file + rename).
pub fn write_expectations(dir: &Path, set: &OutcomeSet) -> Result<()> {
    debug!(item = set.item, outcomes = set.outcomes.len(), "recording expectations");
    write_json(&expectations_path(dir, set.item), set)
}

/// Remove the recorded outcome set; missing is fine.
pub fn clear_expectations(dir: &Path, item: u64) -> Result<()> {
    let path = expectations_path(dir, item);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("remove expectations {}", path.display())),
    }
}
