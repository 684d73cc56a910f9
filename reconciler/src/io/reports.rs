//! Diff reports for failed verifications under `.reconciler/reports/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::core::verify::DiffReport;
use crate::io::{write_atomic, write_json};

/// Report files already written for `item`, sorted by sequence number.
pub fn list_reports(dir: &Path, item: u64) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let prefix = format!("{item}-");
    let mut found: Vec<(u32, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read reports dir {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("read reports dir {}", dir.display()))?
            .path();
        let seq = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.strip_prefix(&prefix))
            .and_then(|seq| seq.parse::<u32>().ok());
        if let Some(seq) = seq
            && path.extension().is_some_and(|ext| ext == "json")
        {
            found.push((seq, path));
        }
    }
    found.sort();
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Write `<item>-<seq>.json` with the next free sequence number, plus a
/// rendered `.md` twin for humans.
pub fn write_report(dir: &Path, report: &DiffReport) -> Result<PathBuf> {
    let seq = list_reports(dir, report.item)?.len() + 1;
    let path = dir.join(format!("{}-{seq}.json", report.item));
    write_json(&path, report)?;
    write_atomic(&path.with_extension("md"), &report.to_markdown())?;
    info!(item = report.item, path = %path.display(), diffs = report.best_match.diffs.len(), "wrote diff report");
    Ok(path)
}
