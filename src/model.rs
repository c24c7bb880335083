use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Run-wide settings assembled from CLI arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub server_url: Option<String>,
    pub reason: Reason,
    pub chunk_size: usize,
    #[serde(with = "humantime_serde")]
    pub upload_timeout: Duration,
    pub user_agent: String,
    pub assume_yes: bool,
}

/// Coarse session state. Only the orchestrator moves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Editing,
    Busy,
}

/// Where the orchestrator is within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrchestratorState {
    Idle,
    RunningUpload,
    RunningSave,
    Finalizing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Upload,
    Save,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Upload => f.write_str("upload"),
            Phase::Save => f.write_str("save"),
        }
    }
}

/// Why the caller wants modified layers persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Reason {
    Delete,
    #[default]
    Exit,
    Restart,
}

impl Reason {
    pub fn headline(self) -> &'static str {
        match self {
            Reason::Delete => "Unsaved changes - Save/Upload before deleting?",
            Reason::Exit => "Unsaved changes - Save/Upload before exiting?",
            Reason::Restart => "Unsaved changes - Save/Upload before restarting?",
        }
    }
}

/// What the caller should do with the destructive operation after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Everything requested was persisted (or the user chose to discard).
    Proceed,
    /// Something is unresolved and the user asked to cancel.
    Cancel,
    /// Something is unresolved; retry or abandon is up to the caller.
    Review,
}

/// Index of a layer inside the outcome store, stable for one populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub usize);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum FailureCause {
    #[error("unit failed: {0:#}")]
    UnitFailed(Arc<anyhow::Error>),
    #[error("execution interrupted: {0}")]
    ExecutionInterrupted(String),
}

/// Per-slot result. `Failed(None)` covers a failed precondition or a missing unit.
#[derive(Debug, Clone, Default)]
pub enum Outcome {
    #[default]
    Pending,
    Ok,
    Canceled,
    Failed(Option<FailureCause>),
}

impl Outcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Outcome::Pending => OutcomeKind::Pending,
            Outcome::Ok => OutcomeKind::Ok,
            Outcome::Canceled => OutcomeKind::Canceled,
            Outcome::Failed(_) => OutcomeKind::Failed,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }

    pub fn cause(&self) -> Option<&FailureCause> {
        match self {
            Outcome::Failed(cause) => cause.as_ref(),
            _ => None,
        }
    }
}

/// Payload-free view of [`Outcome`] for comparisons and serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeKind {
    Pending,
    Ok,
    Canceled,
    Failed,
}

/// Notifications delivered to presentation layers, in the order they happen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    ModeChanged {
        mode: Mode,
    },
    StateChanged {
        state: OrchestratorState,
    },
    PhaseStarted {
        phase: Phase,
    },
    Progress {
        message: String,
    },
    OutcomeRecorded {
        layer: LayerId,
        name: String,
        phase: Phase,
        outcome: OutcomeKind,
        #[serde(default)]
        cause: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerReport {
    pub name: String,
    pub wants_upload: bool,
    pub wants_save: bool,
    pub upload: OutcomeKind,
    pub save: OutcomeKind,
    #[serde(default)]
    pub upload_cause: Option<String>,
    #[serde(default)]
    pub save_cause: Option<String>,
}

/// What escapes a run: aggregate counts plus per-layer outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    #[serde(default)]
    pub timestamp_utc: String,
    pub canceled: usize,
    pub failed: usize,
    pub unresolved: bool,
    pub cancel_requested: bool,
    pub decision: Decision,
    pub layers: Vec<LayerReport>,
}

impl RunSummary {
    pub fn problems(&self) -> usize {
        self.canceled + self.failed
    }
}
