//! Initialization helpers for `.reconciler/` scaffolding.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

use super::StatePaths;
use super::config::{ReconcilerConfig, write_config};

/// Options for `init_state`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite existing reconciler-owned files.
    pub force: bool,
}

/// Create `.reconciler/` scaffolding in `root`.
///
/// Fails if `.reconciler/` already exists unless `options.force` is set.
/// Item records are never touched, even with `force`.
pub fn init_state(root: &Path, options: &InitOptions) -> Result<StatePaths> {
    let paths = StatePaths::new(root);
    if paths.dir.exists() && !paths.dir.is_dir() {
        return Err(anyhow!(
            "reconciler init: .reconciler exists but is not a directory"
        ));
    }
    if paths.dir.exists() && !options.force {
        return Err(anyhow!(
            "reconciler init: .reconciler already exists (use --force to overwrite)"
        ));
    }

    create_dir(&paths.dir)?;
    create_dir(&paths.items_dir)?;
    create_dir(&paths.expectations_dir)?;
    create_dir(&paths.reports_dir)?;

    let gitignore = paths.dir.join(".gitignore");
    fs::write(&gitignore, STATE_GITIGNORE)
        .with_context(|| format!("write file {}", gitignore.display()))?;
    write_config(&paths.config_path, &ReconcilerConfig::default())?;

    Ok(paths)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("create directory {}", path.display()))
}

const STATE_GITIGNORE: &str = "expectations/\nreports/\n";
