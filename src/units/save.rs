use super::{chunked, LayerSource};
use crate::engine::{IoUnit, UnitState, UnitStatus};
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Writes a layer to its file through a sibling temp file, checking for cancel
/// between chunks. The target is only replaced once everything was written.
pub struct FileSaveUnit {
    label: String,
    source: LayerSource,
    target: PathBuf,
    chunk_size: usize,
    state: UnitState,
}

impl FileSaveUnit {
    pub fn new(name: &str, source: LayerSource, target: PathBuf, chunk_size: usize) -> Self {
        Self {
            label: format!("save '{name}'"),
            source,
            target,
            chunk_size,
            state: UnitState::default(),
        }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .target
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".part");
        self.target.with_file_name(name)
    }

    async fn write(&self) -> Result<()> {
        let body = self.source.load().await?;
        let tmp = self.temp_path();
        let mut file = tokio::fs::File::create(&tmp)
            .await
            .with_context(|| format!("failed to create {}", tmp.display()))?;

        for chunk in chunked(&body, self.chunk_size) {
            if self.state.is_canceled() {
                drop(file);
                let _ = tokio::fs::remove_file(&tmp).await;
                return Ok(());
            }
            file.write_all(&chunk)
                .await
                .with_context(|| format!("failed to write {}", tmp.display()))?;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if self.state.is_canceled() {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Ok(());
        }
        tokio::fs::rename(&tmp, &self.target)
            .await
            .with_context(|| format!("failed to move into {}", self.target.display()))?;
        tracing::debug!(path = %self.target.display(), bytes = body.len(), "layer saved");
        Ok(())
    }
}

impl IoUnit for FileSaveUnit {
    fn label(&self) -> &str {
        &self.label
    }

    fn run(self: Arc<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let result = self.write().await;
            if result.is_err() {
                let _ = tokio::fs::remove_file(self.temp_path()).await;
            }
            self.state.finish(result);
            Ok(())
        })
    }

    fn cancel(&self) {
        self.state.cancel();
    }

    fn status(&self) -> UnitStatus {
        self.state.status()
    }
}
