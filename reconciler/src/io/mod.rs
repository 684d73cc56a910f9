//! Side-effecting collaborators of the reconcile loop.
//!
//! Everything that touches the filesystem, spawns processes or talks to the
//! tracked-item system lives here so the core stays pure.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

pub mod agent;
pub mod config;
pub mod expectations;
pub mod init;
pub mod process;
pub mod prompt;
pub mod reports;
pub mod store;
pub mod system;

/// Well-known locations under `<root>/.reconciler/`.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub dir: PathBuf,
    pub config_path: PathBuf,
    pub items_dir: PathBuf,
    pub expectations_dir: PathBuf,
    pub reports_dir: PathBuf,
}

impl StatePaths {
    pub fn new(root: &Path) -> Self {
        let dir = root.join(".reconciler");
        Self {
            config_path: dir.join("config.toml"),
            items_dir: dir.join("items"),
            expectations_dir: dir.join("expectations"),
            reports_dir: dir.join("reports"),
            dir,
        }
    }
}

/// Write `contents` via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

/// Pretty JSON with a trailing newline, written atomically.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value)
        .with_context(|| format!("serialize {}", path.display()))?;
    buf.push('\n');
    write_atomic(path, &buf)
}
