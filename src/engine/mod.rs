//! Units of work and the machinery that runs them one at a time.

mod cancel;
mod executor;

pub use cancel::CancelHandle;
pub use executor::{JobStatus, SingleExecutor, UnitHandle};

use futures::future::BoxFuture;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

/// Terminal state a unit records about itself.
#[derive(Debug, Clone, Default)]
pub enum UnitStatus {
    #[default]
    Pending,
    Succeeded,
    Canceled,
    /// Failed, optionally with the error the unit captured.
    Failed(Option<Arc<anyhow::Error>>),
}

/// One cancellable, run-once upload or save of a single layer.
///
/// `run` returning `Err` means the unit raised instead of recording its own
/// failure; the orchestrator reports such causes to the caller.
pub trait IoUnit: Send + Sync {
    fn label(&self) -> &str;

    fn run(self: Arc<Self>) -> BoxFuture<'static, anyhow::Result<()>>;

    /// Request early termination. Must return promptly.
    fn cancel(&self);

    fn status(&self) -> UnitStatus;
}

/// Bookkeeping shared by concrete units: a cancel flag plus the recorded status.
#[derive(Debug, Default)]
pub struct UnitState {
    canceled: AtomicBool,
    status: Mutex<UnitStatus>,
}

impl UnitState {
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> UnitStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record the result of a run. A cancel request wins over success.
    pub fn finish(&self, result: anyhow::Result<()>) {
        let status = match result {
            Ok(()) if self.is_canceled() => UnitStatus::Canceled,
            Ok(()) => UnitStatus::Succeeded,
            Err(e) => UnitStatus::Failed(Some(Arc::new(e))),
        };
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    pub fn mark_canceled(&self) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = UnitStatus::Canceled;
    }
}
