//! Phase loop.
//!
//! Each phase walks its entries in list order, submits one unit at a time and records
//! the outcome before advancing, so at most one unit is ever in flight.

use crate::engine::{CancelHandle, IoUnit, JobStatus, SingleExecutor, UnitStatus};
use crate::error::HandOffError;
use crate::handoff::UiHandle;
use crate::layer::{Layer, PreconditionChecker};
use crate::model::{FailureCause, LayerId, Mode, OrchestratorState, Outcome, Phase, RunSummary};
use crate::store::LayerEntry;
use anyhow::Result;
use std::sync::Arc;

/// Drives one run. Consumed by [`Orchestrator::run`]; build a new one per run.
pub struct Orchestrator {
    ui: UiHandle,
    cancel: CancelHandle,
    checker: Arc<dyn PreconditionChecker>,
    state: OrchestratorState,
}

impl Orchestrator {
    pub fn new(ui: UiHandle, cancel: CancelHandle, checker: Arc<dyn PreconditionChecker>) -> Self {
        Self {
            ui,
            cancel,
            checker,
            state: OrchestratorState::Idle,
        }
    }

    pub async fn run(mut self) -> Result<RunSummary> {
        self.ui
            .run_and_wait(|p| p.store_mut().set_mode(Mode::Busy))
            .await?;
        let mut executor = SingleExecutor::new(self.cancel.clone());

        self.transition(OrchestratorState::RunningUpload).await?;
        // Re-read at phase entry: only entries still pending take part.
        let to_upload = self
            .ui
            .run_and_wait(|p| p.store().layers_to_upload())
            .await?;
        self.run_phase(&executor, Phase::Upload, to_upload).await?;

        self.transition(OrchestratorState::RunningSave).await?;
        let to_save = self.ui.run_and_wait(|p| p.store().layers_to_save()).await?;
        self.run_phase(&executor, Phase::Save, to_save).await?;

        self.transition(OrchestratorState::Finalizing).await?;
        let cancel_requested = self.cancel.is_requested();
        let summary = self
            .ui
            .run_and_wait(move |p| super::finalize(p, cancel_requested))
            .await?;
        executor.shutdown();

        self.transition(OrchestratorState::Idle).await?;
        Ok(summary)
    }

    async fn transition(&mut self, next: OrchestratorState) -> Result<(), HandOffError> {
        tracing::debug!(from = ?self.state, to = ?next, "orchestrator transition");
        self.state = next;
        self.ui
            .run_and_wait(move |p| p.store_mut().notify_state(next))
            .await
    }

    async fn run_phase(
        &self,
        executor: &SingleExecutor,
        phase: Phase,
        entries: Vec<LayerEntry>,
    ) -> Result<(), HandOffError> {
        if entries.is_empty() {
            return Ok(());
        }
        tracing::info!(%phase, layers = entries.len(), "phase started");
        self.ui
            .run_and_wait(move |p| p.store_mut().notify_phase_started(phase))
            .await?;

        for entry in entries {
            let outcome = self.process(executor, phase, &entry).await?;
            self.record(entry.id(), phase, outcome).await?;
        }
        Ok(())
    }

    /// Decide the outcome of one entry. Item failures never escape; only a broken
    /// hand-off does.
    async fn process(
        &self,
        executor: &SingleExecutor,
        phase: Phase,
        entry: &LayerEntry,
    ) -> Result<Outcome, HandOffError> {
        if self.cancel.is_requested() {
            return Ok(Outcome::Canceled);
        }

        if phase == Phase::Upload {
            let message = format!("Preparing layer '{}' for upload ...", entry.name());
            self.ui
                .run_and_wait(move |p| p.store_mut().notify_progress(&message))
                .await?;
        }

        if !self.precondition_holds(phase, entry).await? {
            tracing::info!(layer = entry.name(), %phase, "precondition failed");
            return Ok(Outcome::Failed(None));
        }

        if phase == Phase::Upload {
            let id = entry.id();
            let accepted = self.ui.run_and_wait(move |p| p.confirm_upload(id)).await?;
            if !accepted {
                tracing::info!(layer = entry.name(), "upload declined");
                return Ok(Outcome::Canceled);
            }
        }

        let unit = match phase {
            Phase::Upload => entry.layer().upload_unit(),
            Phase::Save => entry.layer().save_unit(),
        };
        let Some(unit) = unit else {
            tracing::warn!(layer = entry.name(), %phase, "layer provided no unit");
            return Ok(Outcome::Failed(None));
        };

        self.execute(executor, phase, entry, unit).await
    }

    /// Run the phase's readiness check once per entry; a pass is remembered in the store.
    async fn precondition_holds(
        &self,
        phase: Phase,
        entry: &LayerEntry,
    ) -> Result<bool, HandOffError> {
        if entry.precondition_checked(phase) {
            return Ok(true);
        }
        let layer: &dyn Layer = &**entry.layer();
        let ok = match phase {
            Phase::Upload => self.checker.check_upload(layer),
            Phase::Save => layer.check_save_conditions(),
        };
        if ok {
            let id = entry.id();
            self.ui
                .run_and_wait(move |p| {
                    if let Err(e) = p.store_mut().mark_precondition_checked(id, phase) {
                        tracing::warn!("{e}");
                    }
                })
                .await?;
        }
        Ok(ok)
    }

    async fn execute(
        &self,
        executor: &SingleExecutor,
        phase: Phase,
        entry: &LayerEntry,
        unit: Arc<dyn IoUnit>,
    ) -> Result<Outcome, HandOffError> {
        tracing::info!(layer = entry.name(), %phase, unit = unit.label(), "submitting unit");
        let status = executor.submit(unit.clone()).wait().await;
        self.settle(phase, entry, unit.as_ref(), status).await
    }

    /// Map how the executor saw the unit end onto the entry's outcome.
    async fn settle(
        &self,
        phase: Phase,
        entry: &LayerEntry,
        unit: &dyn IoUnit,
        status: JobStatus,
    ) -> Result<Outcome, HandOffError> {
        let outcome = match status {
            JobStatus::Canceled => Outcome::Canceled,
            JobStatus::Raised(cause) => {
                self.failed(phase, entry, FailureCause::UnitFailed(cause))
                    .await?
            }
            JobStatus::Interrupted(reason) => {
                self.failed(phase, entry, FailureCause::ExecutionInterrupted(reason))
                    .await?
            }
            JobStatus::Completed => match unit.status() {
                UnitStatus::Canceled => Outcome::Canceled,
                UnitStatus::Failed(Some(cause)) => {
                    self.failed(phase, entry, FailureCause::UnitFailed(cause))
                        .await?
                }
                UnitStatus::Failed(None) => Outcome::Failed(None),
                UnitStatus::Succeeded | UnitStatus::Pending => Outcome::Ok,
            },
        };
        Ok(outcome)
    }

    /// Log and surface a failure cause, then wrap it as the entry's outcome.
    async fn failed(
        &self,
        phase: Phase,
        entry: &LayerEntry,
        cause: FailureCause,
    ) -> Result<Outcome, HandOffError> {
        tracing::error!(layer = entry.name(), %phase, "{cause}");
        let name = entry.name().to_string();
        let reported = cause.clone();
        self.ui
            .run_and_wait(move |p| p.report(&name, phase, &reported))
            .await?;
        Ok(Outcome::Failed(Some(cause)))
    }

    async fn record(
        &self,
        id: LayerId,
        phase: Phase,
        outcome: Outcome,
    ) -> Result<(), HandOffError> {
        self.ui
            .run_and_wait(move |p| p.store_mut().set_outcome(id, phase, outcome))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::UnitState;
    use crate::handoff;
    use crate::layer::ConflictFreeCheck;
    use crate::session::{ErrorReporter, Presentation};
    use futures::future::BoxFuture;
    use std::sync::Mutex;

    struct Roads;

    impl Layer for Roads {
        fn name(&self) -> &str {
            "roads"
        }
        fn upload_unit(&self) -> Option<Arc<dyn IoUnit>> {
            None
        }
        fn save_unit(&self) -> Option<Arc<dyn IoUnit>> {
            None
        }
    }

    #[derive(Default)]
    struct Untouched(UnitState);

    impl IoUnit for Untouched {
        fn label(&self) -> &str {
            "untouched"
        }
        fn run(self: Arc<Self>) -> BoxFuture<'static, Result<()>> {
            Box::pin(async { Ok(()) })
        }
        fn cancel(&self) {
            self.0.cancel();
        }
        fn status(&self) -> UnitStatus {
            self.0.status()
        }
    }

    struct Collect(Arc<Mutex<Vec<String>>>);

    impl ErrorReporter for Collect {
        fn report(&mut self, layer: &str, phase: Phase, cause: &FailureCause) {
            self.0.lock().unwrap().push(format!("{phase} {layer}: {cause}"));
        }
    }

    #[tokio::test]
    async fn test_interrupted_unit_is_failed_and_reported() {
        let reported = Arc::new(Mutex::new(Vec::new()));
        let (ui, mut jobs) = handoff::channel();
        let sink = reported.clone();
        let serve = tokio::spawn(async move {
            let mut presentation = Presentation::with_reporter(Collect(sink));
            while let Some(job) = jobs.recv().await {
                job(&mut presentation);
            }
        });

        let orchestrator = Orchestrator::new(ui, CancelHandle::new(), Arc::new(ConflictFreeCheck));
        let entry = LayerEntry::new(Arc::new(Roads), true, false);
        let outcome = orchestrator
            .settle(
                Phase::Upload,
                &entry,
                &Untouched::default(),
                JobStatus::Interrupted("executor shut down".into()),
            )
            .await
            .unwrap();
        drop(orchestrator);
        serve.await.unwrap();

        assert!(matches!(
            outcome,
            Outcome::Failed(Some(FailureCause::ExecutionInterrupted(ref reason)))
                if reason == "executor shut down"
        ));
        assert_eq!(
            *reported.lock().unwrap(),
            vec!["upload roads: execution interrupted: executor shut down"]
        );
    }

    #[tokio::test]
    async fn test_completed_unit_status_decides_outcome() {
        let (ui, mut jobs) = handoff::channel();
        let serve = tokio::spawn(async move {
            let mut presentation = Presentation::default();
            while let Some(job) = jobs.recv().await {
                job(&mut presentation);
            }
        });
        let orchestrator = Orchestrator::new(ui, CancelHandle::new(), Arc::new(ConflictFreeCheck));
        let entry = LayerEntry::new(Arc::new(Roads), false, true);

        let unit = Untouched::default();
        unit.0.finish(Ok(()));
        let ok = orchestrator
            .settle(Phase::Save, &entry, &unit, JobStatus::Completed)
            .await
            .unwrap();
        assert!(matches!(ok, Outcome::Ok));

        let unit = Untouched::default();
        unit.cancel();
        unit.0.finish(Ok(()));
        let canceled = orchestrator
            .settle(Phase::Save, &entry, &unit, JobStatus::Completed)
            .await
            .unwrap();
        assert!(matches!(canceled, Outcome::Canceled));

        drop(orchestrator);
        serve.await.unwrap();
    }
}
