//! JSON manifest describing the layers to persist, and the layer type built from it.

use crate::engine::IoUnit;
use crate::layer::Layer;
use crate::preflight::is_writable_target;
use crate::store::LayerEntry;
use crate::units::{FileSaveUnit, HttpUploadUnit, LayerSource, UploadTarget};
use anyhow::{Context, Result};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub layers: Vec<LayerDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerDecl {
    pub name: String,
    /// File holding the layer's content.
    #[serde(default)]
    pub source: Option<PathBuf>,
    /// Inline content, used when `source` is absent.
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    #[serde(default)]
    pub upload: bool,
    #[serde(default)]
    pub save: bool,
    /// File the layer is saved to.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde(default)]
    pub conflicts: bool,
}

pub fn load(path: &Path) -> Result<Manifest> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid manifest {}", path.display()))
}

/// Turn manifest entries into outcome-store entries. Relative paths resolve
/// against `base_dir`.
pub fn build_entries(
    manifest: &Manifest,
    base_dir: &Path,
    upload: Option<&UploadTarget>,
    chunk_size: usize,
) -> Result<Vec<LayerEntry>> {
    manifest
        .layers
        .iter()
        .map(|decl| {
            let layer = ManifestLayer::from_decl(decl, base_dir, upload.cloned(), chunk_size)?;
            Ok(LayerEntry::new(Arc::new(layer), decl.upload, decl.save))
        })
        .collect()
}

pub struct ManifestLayer {
    name: String,
    source: LayerSource,
    file: Option<PathBuf>,
    conflicts: bool,
    upload: Option<UploadTarget>,
    chunk_size: usize,
}

impl ManifestLayer {
    fn from_decl(
        decl: &LayerDecl,
        base_dir: &Path,
        upload: Option<UploadTarget>,
        chunk_size: usize,
    ) -> Result<Self> {
        let source = match (&decl.source, &decl.content) {
            (Some(path), _) => LayerSource::File(base_dir.join(path)),
            (None, Some(value)) => LayerSource::Inline(Bytes::from(
                serde_json::to_vec_pretty(value)
                    .with_context(|| format!("failed to encode content of '{}'", decl.name))?,
            )),
            (None, None) => anyhow::bail!("layer '{}' has neither source nor content", decl.name),
        };
        Ok(Self {
            name: decl.name.clone(),
            source,
            file: decl.file.as_ref().map(|f| base_dir.join(f)),
            conflicts: decl.conflicts,
            upload,
            chunk_size,
        })
    }
}

impl Layer for ManifestLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn upload_unit(&self) -> Option<Arc<dyn IoUnit>> {
        let target = self.upload.as_ref()?;
        let url = target.layer_url(&self.name)?;
        Some(Arc::new(HttpUploadUnit::new(
            &self.name,
            target,
            url,
            self.source.clone(),
        )))
    }

    fn save_unit(&self) -> Option<Arc<dyn IoUnit>> {
        let file = self.file.clone()?;
        Some(Arc::new(FileSaveUnit::new(
            &self.name,
            self.source.clone(),
            file,
            self.chunk_size,
        )))
    }

    fn check_save_conditions(&self) -> bool {
        self.file.as_deref().is_some_and(is_writable_target)
    }

    fn has_conflicts(&self) -> bool {
        self.conflicts
    }

    fn save_file(&self) -> Option<&Path> {
        self.file.as_deref()
    }
}
