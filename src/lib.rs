//! Persist modified layers before a destructive operation.
//!
//! A [`SaveSession`] holds the layers that need uploading or saving and runs the
//! upload phase, then the save phase, one unit at a time on a single executor while
//! the calling task stays free to answer confirmations and show progress.

pub mod cli;
pub mod engine;
pub mod error;
mod handoff;
pub mod layer;
pub mod manifest;
pub mod model;
pub mod orchestrator;
pub mod preflight;
pub mod session;
pub mod storage;
pub mod store;
mod text_summary;
pub mod units;

pub use engine::{
    CancelHandle, IoUnit, JobStatus, SingleExecutor, UnitHandle, UnitState, UnitStatus,
};
pub use error::{HandOffError, PreflightError, StoreError};
pub use layer::{ConflictFreeCheck, Layer, PreconditionChecker};
pub use model::{
    Decision, FailureCause, LayerId, LayerReport, Mode, OrchestratorState, Outcome, OutcomeKind,
    Phase, Reason, RunConfig, RunSummary, SessionEvent,
};
pub use session::{
    AcceptAll, Confirmation, ErrorReporter, LogErrors, LogWarnings, Presentation, SaveSession,
    UploadConfirmer, WarningSink,
};
pub use store::{EventForwarder, LayerEntry, OutcomeStore, SessionObserver};
