//! Orchestration session: the outcome store, the collaborators that live on the
//! presentation side, and the entry points callers use (populate, run, cancel).

use crate::engine::CancelHandle;
use crate::error::{PreflightError, StoreError};
use crate::handoff;
use crate::layer::{ConflictFreeCheck, PreconditionChecker};
use crate::model::{FailureCause, LayerId, Mode, Phase, RunSummary};
use crate::orchestrator::Orchestrator;
use crate::preflight;
use crate::store::{LayerEntry, OutcomeStore, SessionObserver};
use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::AbortHandle;

/// Answer of the per-layer upload confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    /// Go ahead; with `remember` set, stop asking for the rest of the session.
    Accept { remember: bool },
    Decline,
}

/// Asked on the presentation side before each upload.
pub trait UploadConfirmer: Send {
    fn confirm(&mut self, entry: &LayerEntry) -> Confirmation;
}

/// Accepts every upload without asking.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAll;

impl UploadConfirmer for AcceptAll {
    fn confirm(&mut self, _entry: &LayerEntry) -> Confirmation {
        Confirmation::Accept { remember: false }
    }
}

impl<F> UploadConfirmer for F
where
    F: FnMut(&LayerEntry) -> Confirmation + Send,
{
    fn confirm(&mut self, entry: &LayerEntry) -> Confirmation {
        self(entry)
    }
}

/// Told once per run when some requested upload or save did not succeed.
pub trait WarningSink: Send {
    fn warn(&mut self, canceled: usize, failed: usize);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogWarnings;

impl WarningSink for LogWarnings {
    fn warn(&mut self, canceled: usize, failed: usize) {
        tracing::warn!(
            canceled,
            failed,
            "{} problems occurred during upload/save",
            canceled + failed
        );
    }
}

impl<F> WarningSink for F
where
    F: FnMut(usize, usize) + Send,
{
    fn warn(&mut self, canceled: usize, failed: usize) {
        self(canceled, failed)
    }
}

/// Receives unexpected failure causes so they can be shown to the user.
pub trait ErrorReporter: Send {
    fn report(&mut self, layer: &str, phase: Phase, cause: &FailureCause);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrors;

impl ErrorReporter for LogErrors {
    fn report(&mut self, layer: &str, phase: Phase, cause: &FailureCause) {
        tracing::error!(layer, %phase, "{cause}");
    }
}

/// State owned by the presentation side. Hand-off jobs run against it.
pub struct Presentation {
    store: OutcomeStore,
    confirmer: Box<dyn UploadConfirmer>,
    warnings: Box<dyn WarningSink>,
    reporter: Box<dyn ErrorReporter>,
    remember_accept: bool,
}

impl Default for Presentation {
    fn default() -> Self {
        Self {
            store: OutcomeStore::new(),
            confirmer: Box::new(AcceptAll),
            warnings: Box::new(LogWarnings),
            reporter: Box::new(LogErrors),
            remember_accept: false,
        }
    }
}

impl Presentation {
    #[cfg(test)]
    pub(crate) fn with_reporter(reporter: impl ErrorReporter + 'static) -> Self {
        Self {
            reporter: Box::new(reporter),
            ..Self::default()
        }
    }

    pub fn store(&self) -> &OutcomeStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut OutcomeStore {
        &mut self.store
    }

    pub(crate) fn confirm_upload(&mut self, id: LayerId) -> bool {
        if self.remember_accept {
            return true;
        }
        let Some(entry) = self.store.entry(id) else {
            return false;
        };
        match self.confirmer.confirm(entry) {
            Confirmation::Accept { remember } => {
                self.remember_accept |= remember;
                true
            }
            Confirmation::Decline => false,
        }
    }

    pub(crate) fn report(&mut self, layer: &str, phase: Phase, cause: &FailureCause) {
        self.reporter.report(layer, phase, cause);
    }

    pub(crate) fn warn_unresolved(&mut self, canceled: usize, failed: usize) {
        self.warnings.warn(canceled, failed);
    }
}

/// One save/upload session. Owns the store; each [`SaveSession::run`] is a fresh
/// orchestrator over whatever is still pending.
pub struct SaveSession {
    presentation: Presentation,
    cancel: CancelHandle,
    checker: Arc<dyn PreconditionChecker>,
}

impl Default for SaveSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SaveSession {
    pub fn new() -> Self {
        Self {
            presentation: Presentation::default(),
            cancel: CancelHandle::new(),
            checker: Arc::new(ConflictFreeCheck),
        }
    }

    pub fn with_confirmer(mut self, confirmer: impl UploadConfirmer + 'static) -> Self {
        self.presentation.confirmer = Box::new(confirmer);
        self
    }

    pub fn with_warning_sink(mut self, sink: impl WarningSink + 'static) -> Self {
        self.presentation.warnings = Box::new(sink);
        self
    }

    pub fn with_error_reporter(mut self, reporter: impl ErrorReporter + 'static) -> Self {
        self.presentation.reporter = Box::new(reporter);
        self
    }

    pub fn with_precondition_checker(
        mut self,
        checker: impl PreconditionChecker + 'static,
    ) -> Self {
        self.checker = Arc::new(checker);
        self
    }

    pub fn populate(
        &mut self,
        entries: impl IntoIterator<Item = LayerEntry>,
    ) -> Result<(), StoreError> {
        self.presentation.remember_accept = false;
        self.presentation.store.populate(entries)
    }

    pub fn subscribe(&mut self, observer: impl SessionObserver + 'static) {
        self.presentation.store.subscribe(Box::new(observer));
    }

    pub fn store(&self) -> &OutcomeStore {
        &self.presentation.store
    }

    /// The cancel entry point. Usable from any task, before or during a run.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn preflight(&self) -> Result<(), PreflightError> {
        preflight::check(self.presentation.store.entries())
    }

    /// Drive the upload phase then the save phase to completion.
    ///
    /// The calling task serves hand-off jobs until the orchestrator is done. A cancel
    /// issued before this call applies to this run; the flag is cleared afterwards.
    /// Dropping the returned future cancels the run and leaves the session editable.
    pub async fn run(&mut self) -> Result<RunSummary> {
        let (ui, mut jobs) = handoff::channel();
        let orchestrator = Orchestrator::new(ui, self.cancel.clone(), self.checker.clone());
        let task = tokio::spawn(orchestrator.run());
        let mut guard = RunGuard {
            presentation: &mut self.presentation,
            cancel: &self.cancel,
            task: Some(task.abort_handle()),
        };

        while let Some(job) = jobs.recv().await {
            job(&mut *guard.presentation);
        }

        let result = task.await.context("orchestrator task failed");
        guard.task = None;
        drop(guard);
        result?
    }

    /// Put every requested slot that did not end `Ok` back to pending for another run.
    ///
    /// Preconditions that already passed are not checked again.
    pub fn requeue_unresolved(&mut self) -> Result<usize, StoreError> {
        self.presentation.store.requeue_unresolved()
    }
}

/// End-of-run cleanup. Still holding the task means the run future was dropped
/// before the orchestrator finished.
struct RunGuard<'a> {
    presentation: &'a mut Presentation,
    cancel: &'a CancelHandle,
    task: Option<AbortHandle>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            tracing::warn!("run abandoned before completion, cancelling");
            self.cancel.cancel();
            task.abort();
        }
        self.cancel.reset();
        if self.presentation.store.mode() == Mode::Busy {
            self.presentation.store.set_mode(Mode::Editing);
        }
    }
}
