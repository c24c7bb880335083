//! Capability contract for layers that can be persisted.

use crate::engine::IoUnit;
use std::path::Path;
use std::sync::Arc;

/// A modifiable layer as the orchestrator sees it.
///
/// Which layers need persisting is decided by whoever builds the entries; the
/// layer only hands out units of work for the phases it supports.
pub trait Layer: Send + Sync {
    fn name(&self) -> &str;

    /// A fresh unit uploading this layer, or `None` if it cannot be uploaded.
    fn upload_unit(&self) -> Option<Arc<dyn IoUnit>>;

    /// A fresh unit saving this layer locally, or `None` if it cannot be saved.
    fn save_unit(&self) -> Option<Arc<dyn IoUnit>>;

    /// Save-readiness gate, run off the presentation thread before the first save.
    fn check_save_conditions(&self) -> bool {
        true
    }

    fn has_conflicts(&self) -> bool {
        false
    }

    /// File the layer is saved to, if one is associated.
    fn save_file(&self) -> Option<&Path> {
        None
    }
}

/// Upload-readiness gate.
///
/// Called on the orchestrator's task, so implementations must not wait on the
/// presentation side.
pub trait PreconditionChecker: Send + Sync {
    fn check_upload(&self, layer: &dyn Layer) -> bool;
}

/// Rejects uploads of layers with unresolved conflicts.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConflictFreeCheck;

impl PreconditionChecker for ConflictFreeCheck {
    fn check_upload(&self, layer: &dyn Layer) -> bool {
        !layer.has_conflicts()
    }
}

impl<F> PreconditionChecker for F
where
    F: Fn(&dyn Layer) -> bool + Send + Sync,
{
    fn check_upload(&self, layer: &dyn Layer) -> bool {
        self(layer)
    }
}
