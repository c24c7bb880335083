//! Checks run before a run is launched; a failure means nothing is started.

use crate::error::PreflightError;
use crate::store::LayerEntry;
use std::path::Path;

/// Refuse the run if a requested upload or save cannot possibly succeed.
///
/// Categories are checked in order: conflicts with an upload request, saves without a
/// file, saves to a file that cannot be written.
pub fn check(entries: &[LayerEntry]) -> Result<(), PreflightError> {
    let conflicted = names(entries, |e| e.wants_upload() && e.layer().has_conflicts());
    if !conflicted.is_empty() {
        return Err(PreflightError::ConflictsWithUploadRequest(conflicted));
    }

    let missing = names(entries, |e| e.wants_save() && e.layer().save_file().is_none());
    if !missing.is_empty() {
        return Err(PreflightError::MissingFile(missing));
    }

    let unwritable = names(entries, |e| {
        e.wants_save()
            && e
                .layer()
                .save_file()
                .is_some_and(|path| !is_writable_target(path))
    });
    if !unwritable.is_empty() {
        return Err(PreflightError::UnwritableFile(unwritable));
    }

    Ok(())
}

fn names(entries: &[LayerEntry], pred: impl Fn(&LayerEntry) -> bool) -> Vec<String> {
    entries
        .iter()
        .filter(|e| pred(e))
        .map(|e| e.name().to_string())
        .collect()
}

/// An existing writable file, or a new file inside an existing writable directory.
pub fn is_writable_target(path: &Path) -> bool {
    if let Ok(meta) = std::fs::metadata(path) {
        return meta.is_file() && !meta.permissions().readonly();
    }
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::metadata(parent)
        .map(|meta| meta.is_dir() && !meta.permissions().readonly())
        .unwrap_or(false)
}
