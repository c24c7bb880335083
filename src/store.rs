//! Outcome store: participating layers, their per-phase outcomes and the session mode.
//!
//! The orchestrator is the only writer during a run; every mutation is applied on the
//! presentation side and observers are notified synchronously, in mutation order.

use crate::error::StoreError;
use crate::layer::Layer;
use crate::model::{
    LayerId, LayerReport, Mode, OrchestratorState, Outcome, OutcomeKind, Phase, SessionEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// One participating layer with its intents and outcomes.
#[derive(Clone)]
pub struct LayerEntry {
    id: LayerId,
    layer: Arc<dyn Layer>,
    wants_upload: bool,
    wants_save: bool,
    upload_precondition_checked: bool,
    save_precondition_checked: bool,
    upload: Outcome,
    save: Outcome,
}

impl LayerEntry {
    pub fn new(layer: Arc<dyn Layer>, wants_upload: bool, wants_save: bool) -> Self {
        Self {
            id: LayerId(0),
            layer,
            wants_upload,
            wants_save,
            upload_precondition_checked: false,
            save_precondition_checked: false,
            upload: Outcome::Pending,
            save: Outcome::Pending,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn layer(&self) -> &Arc<dyn Layer> {
        &self.layer
    }

    pub fn name(&self) -> &str {
        self.layer.name()
    }

    pub fn wants_upload(&self) -> bool {
        self.wants_upload
    }

    pub fn wants_save(&self) -> bool {
        self.wants_save
    }

    pub fn wants(&self, phase: Phase) -> bool {
        match phase {
            Phase::Upload => self.wants_upload,
            Phase::Save => self.wants_save,
        }
    }

    pub fn outcome(&self, phase: Phase) -> &Outcome {
        match phase {
            Phase::Upload => &self.upload,
            Phase::Save => &self.save,
        }
    }

    pub fn precondition_checked(&self, phase: Phase) -> bool {
        match phase {
            Phase::Upload => self.upload_precondition_checked,
            Phase::Save => self.save_precondition_checked,
        }
    }

    /// Requested but not (yet) successfully persisted.
    fn unresolved(&self, phase: Phase) -> bool {
        self.wants(phase) && !matches!(self.outcome(phase), Outcome::Ok)
    }

    fn report(&self) -> LayerReport {
        LayerReport {
            name: self.name().to_string(),
            wants_upload: self.wants_upload,
            wants_save: self.wants_save,
            upload: self.upload.kind(),
            save: self.save.kind(),
            upload_cause: self.upload.cause().map(|c| c.to_string()),
            save_cause: self.save.cause().map(|c| c.to_string()),
        }
    }
}

impl std::fmt::Debug for LayerEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerEntry")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("wants_upload", &self.wants_upload)
            .field("wants_save", &self.wants_save)
            .field("upload", &self.upload.kind())
            .field("save", &self.save.kind())
            .finish()
    }
}

/// Subscriber for mode and outcome changes. All methods default to no-ops.
pub trait SessionObserver: Send {
    fn mode_changed(&mut self, _mode: Mode) {}

    fn state_changed(&mut self, _state: OrchestratorState) {}

    fn phase_started(&mut self, _phase: Phase) {}

    fn progress(&mut self, _message: &str) {}

    fn outcome_recorded(&mut self, _entry: &LayerEntry, _phase: Phase, _outcome: &Outcome) {}
}

/// Forwards store notifications as [`SessionEvent`]s over a channel.
pub struct EventForwarder {
    tx: UnboundedSender<SessionEvent>,
}

impl EventForwarder {
    pub fn new(tx: UnboundedSender<SessionEvent>) -> Self {
        Self { tx }
    }
}

impl SessionObserver for EventForwarder {
    fn mode_changed(&mut self, mode: Mode) {
        let _ = self.tx.send(SessionEvent::ModeChanged { mode });
    }

    fn state_changed(&mut self, state: OrchestratorState) {
        let _ = self.tx.send(SessionEvent::StateChanged { state });
    }

    fn phase_started(&mut self, phase: Phase) {
        let _ = self.tx.send(SessionEvent::PhaseStarted { phase });
    }

    fn progress(&mut self, message: &str) {
        let _ = self.tx.send(SessionEvent::Progress {
            message: message.to_string(),
        });
    }

    fn outcome_recorded(&mut self, entry: &LayerEntry, phase: Phase, outcome: &Outcome) {
        let _ = self.tx.send(SessionEvent::OutcomeRecorded {
            layer: entry.id(),
            name: entry.name().to_string(),
            phase,
            outcome: outcome.kind(),
            cause: outcome.cause().map(|c| c.to_string()),
        });
    }
}

#[derive(Default)]
pub struct OutcomeStore {
    mode: Mode,
    entries: Vec<LayerEntry>,
    observers: Vec<Box<dyn SessionObserver>>,
}

impl OutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the layers to process, resetting outcomes and precondition flags.
    pub fn populate(
        &mut self,
        entries: impl IntoIterator<Item = LayerEntry>,
    ) -> Result<(), StoreError> {
        if self.mode == Mode::Busy {
            return Err(StoreError::InvalidState {
                operation: "populate",
                mode: self.mode,
            });
        }
        self.entries = entries
            .into_iter()
            .enumerate()
            .map(|(i, mut entry)| {
                entry.id = LayerId(i);
                entry.upload = Outcome::Pending;
                entry.save = Outcome::Pending;
                entry.upload_precondition_checked = false;
                entry.save_precondition_checked = false;
                entry
            })
            .collect();
        tracing::debug!(layers = self.entries.len(), "outcome store populated");
        Ok(())
    }

    pub fn subscribe(&mut self, observer: Box<dyn SessionObserver>) {
        self.observers.push(observer);
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: Mode) {
        tracing::debug!(from = ?self.mode, to = ?mode, "mode transition");
        self.mode = mode;
        for observer in &mut self.observers {
            observer.mode_changed(mode);
        }
    }

    pub fn entries(&self) -> &[LayerEntry] {
        &self.entries
    }

    pub fn entry(&self, id: LayerId) -> Option<&LayerEntry> {
        self.entries.get(id.0)
    }

    pub fn set_upload_outcome(&mut self, id: LayerId, outcome: Outcome) {
        self.set_outcome(id, Phase::Upload, outcome);
    }

    pub fn set_save_outcome(&mut self, id: LayerId, outcome: Outcome) {
        self.set_outcome(id, Phase::Save, outcome);
    }

    /// Record a terminal outcome. Panics on any transition other than
    /// `Pending -> {Ok, Canceled, Failed}`.
    pub fn set_outcome(&mut self, id: LayerId, phase: Phase, outcome: Outcome) {
        let Some(entry) = self.entries.get_mut(id.0) else {
            panic!("outcome recorded for unknown layer {id}");
        };
        assert!(
            !outcome.is_pending(),
            "{phase} outcome of layer '{}' cannot be reset to pending",
            entry.name()
        );
        let slot = match phase {
            Phase::Upload => &mut entry.upload,
            Phase::Save => &mut entry.save,
        };
        assert!(
            slot.is_pending(),
            "{phase} outcome of layer '{}' already {:?}, refusing {:?}",
            entry.layer.name(),
            slot.kind(),
            outcome.kind()
        );
        *slot = outcome;

        let entry = &self.entries[id.0];
        let outcome = entry.outcome(phase);
        tracing::debug!(layer = entry.name(), %phase, outcome = ?outcome.kind(), "outcome recorded");
        for observer in &mut self.observers {
            observer.outcome_recorded(entry, phase, outcome);
        }
    }

    pub fn mark_precondition_checked(
        &mut self,
        id: LayerId,
        phase: Phase,
    ) -> Result<(), StoreError> {
        let entry = self
            .entries
            .get_mut(id.0)
            .ok_or(StoreError::UnknownLayer(id))?;
        match phase {
            Phase::Upload => entry.upload_precondition_checked = true,
            Phase::Save => entry.save_precondition_checked = true,
        }
        Ok(())
    }

    /// Reopen requested slots that ended `Canceled` or `Failed` for a retry run.
    /// Precondition flags are kept, so a gate that already passed is not re-run.
    pub fn requeue_unresolved(&mut self) -> Result<usize, StoreError> {
        if self.mode == Mode::Busy {
            return Err(StoreError::InvalidState {
                operation: "requeue",
                mode: self.mode,
            });
        }
        let mut reopened = 0;
        for entry in &mut self.entries {
            if entry.unresolved(Phase::Upload) && !entry.upload.is_pending() {
                entry.upload = Outcome::Pending;
                reopened += 1;
            }
            if entry.unresolved(Phase::Save) && !entry.save.is_pending() {
                entry.save = Outcome::Pending;
                reopened += 1;
            }
        }
        tracing::debug!(reopened, "unresolved outcomes requeued");
        Ok(reopened)
    }

    pub fn layers_to_upload(&self) -> Vec<LayerEntry> {
        self.pending(Phase::Upload)
    }

    pub fn layers_to_save(&self) -> Vec<LayerEntry> {
        self.pending(Phase::Save)
    }

    /// Entries wanting `phase` whose outcome is still pending, in insertion order.
    pub fn pending(&self, phase: Phase) -> Vec<LayerEntry> {
        self.entries
            .iter()
            .filter(|e| e.wants(phase) && e.outcome(phase).is_pending())
            .cloned()
            .collect()
    }

    /// Whether any requested upload or save did not end `Ok`.
    pub fn has_unresolved(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.unresolved(Phase::Upload) || e.unresolved(Phase::Save))
    }

    pub fn cancel_count(&self) -> usize {
        self.count(OutcomeKind::Canceled)
    }

    pub fn failed_count(&self) -> usize {
        self.count(OutcomeKind::Failed)
    }

    fn count(&self, kind: OutcomeKind) -> usize {
        self.entries
            .iter()
            .flat_map(|e| [e.upload.kind(), e.save.kind()])
            .filter(|k| *k == kind)
            .count()
    }

    pub fn notify_state(&mut self, state: OrchestratorState) {
        for observer in &mut self.observers {
            observer.state_changed(state);
        }
    }

    pub fn notify_phase_started(&mut self, phase: Phase) {
        for observer in &mut self.observers {
            observer.phase_started(phase);
        }
    }

    pub fn notify_progress(&mut self, message: &str) {
        for observer in &mut self.observers {
            observer.progress(message);
        }
    }

    pub fn reports(&self) -> Vec<LayerReport> {
        self.entries.iter().map(LayerEntry::report).collect()
    }
}
