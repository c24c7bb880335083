//! Run journal: summaries written under the platform data directory, plus ad-hoc export.

use crate::model::RunSummary;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

fn base_dir() -> Result<PathBuf> {
    let dir = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .context("no data directory available")?;
    Ok(dir.join("layersave"))
}

pub fn runs_dir() -> Result<PathBuf> {
    Ok(base_dir()?.join("runs"))
}

/// File name for a summary, derived from its RFC 3339 timestamp.
fn run_file_name(summary: &RunSummary) -> String {
    let stamp = if summary.timestamp_utc.is_empty() {
        "unknown".to_string()
    } else {
        summary.timestamp_utc.replace(':', "-").replace('T', "_")
    };
    format!("run-{stamp}.json")
}

pub fn save_run(summary: &RunSummary) -> Result<PathBuf> {
    save_run_in(&runs_dir()?, summary)
}

pub(crate) fn save_run_in(dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(run_file_name(summary));
    write_json(&path, summary)?;
    Ok(path)
}

pub fn export_json(path: &Path, summary: &RunSummary) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    write_json(path, summary)
}

fn write_json(path: &Path, summary: &RunSummary) -> Result<()> {
    let data = serde_json::to_vec_pretty(summary)?;
    std::fs::write(path, data).with_context(|| format!("write {}", path.display()))
}

/// Previously journaled summaries, oldest first. Unreadable files are skipped.
pub fn load_recent(limit: usize) -> Result<Vec<RunSummary>> {
    load_recent_in(&runs_dir()?, limit)
}

pub(crate) fn load_recent_in(dir: &Path, limit: usize) -> Result<Vec<RunSummary>> {
    let mut paths: Vec<PathBuf> = match std::fs::read_dir(dir) {
        Ok(rd) => rd
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e).with_context(|| format!("read {}", dir.display())),
    };
    paths.sort();
    let skip = paths.len().saturating_sub(limit);

    let mut out = Vec::new();
    for path in paths.into_iter().skip(skip) {
        match std::fs::read(&path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| Ok(serde_json::from_slice::<RunSummary>(&raw)?))
        {
            Ok(summary) => out.push(summary),
            Err(e) => tracing::debug!(path = %path.display(), "skipping journal entry: {e:#}"),
        }
    }
    Ok(out)
}
