//! Concrete units of work used by the command-line front end.

mod save;
mod upload;

pub use save::FileSaveUnit;
pub use upload::{HttpUploadUnit, UploadTarget};

use anyhow::{Context, Result};
use bytes::Bytes;
use std::path::PathBuf;

/// Where a layer's serialized content comes from.
#[derive(Debug, Clone)]
pub enum LayerSource {
    Inline(Bytes),
    File(PathBuf),
}

impl LayerSource {
    pub async fn load(&self) -> Result<Bytes> {
        match self {
            LayerSource::Inline(bytes) => Ok(bytes.clone()),
            LayerSource::File(path) => tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .with_context(|| format!("failed to read {}", path.display())),
        }
    }
}

/// Split `body` into cheap slices of at most `chunk_size` bytes.
pub(crate) fn chunked(body: &Bytes, chunk_size: usize) -> Vec<Bytes> {
    let size = chunk_size.max(1);
    (0..body.len())
        .step_by(size)
        .map(|start| body.slice(start..(start + size).min(body.len())))
        .collect()
}
