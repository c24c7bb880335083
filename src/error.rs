use crate::model::{LayerId, Mode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot {operation} while the session is {mode:?}")]
    InvalidState { operation: &'static str, mode: Mode },

    #[error("no layer with id {0}")]
    UnknownLayer(LayerId),
}

/// The presentation side stopped serving hand-off requests.
#[derive(Debug, Error)]
pub enum HandOffError {
    #[error("presentation side closed before the request was handled")]
    Closed,
}

/// Reasons a run is refused before it starts. Each variant lists layer names.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreflightError {
    #[error("{} layer(s) have unresolved conflicts and an upload request: {}", .0.len(), .0.join(", "))]
    ConflictsWithUploadRequest(Vec<String>),

    #[error("{} layer(s) need saving but have no associated file: {}", .0.len(), .0.join(", "))]
    MissingFile(Vec<String>),

    #[error("{} layer(s) need saving but their file cannot be written: {}", .0.len(), .0.join(", "))]
    UnwritableFile(Vec<String>),
}
