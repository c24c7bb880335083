use futures::future::BoxFuture;
use layersave::{
    Confirmation, Decision, ErrorReporter, EventForwarder, FailureCause, IoUnit, Layer,
    LayerEntry, Mode, OrchestratorState, OutcomeKind, Phase, SaveSession, SessionEvent, UnitState, UnitStatus,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

#[derive(Debug, Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Raise,
    Panic,
    BlockUntilCanceled,
}

type Log = Arc<Mutex<Vec<String>>>;

struct FakeUnit {
    label: String,
    behavior: Behavior,
    state: UnitState,
    log: Log,
    canceled: Log,
    started: Arc<Notify>,
}

impl IoUnit for FakeUnit {
    fn label(&self) -> &str {
        &self.label
    }

    fn run(self: Arc<Self>) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(async move {
            self.log.lock().unwrap().push(self.label.clone());
            self.started.notify_one();
            match self.behavior {
                Behavior::Succeed => self.state.finish(Ok(())),
                Behavior::Fail => self.state.finish(Err(anyhow::anyhow!("disk full"))),
                Behavior::Raise => return Err(anyhow::anyhow!("unit exploded")),
                Behavior::Panic => panic!("unit panicked"),
                Behavior::BlockUntilCanceled => {
                    while !self.state.is_canceled() {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    self.state.finish(Ok(()));
                }
            }
            Ok(())
        })
    }

    fn cancel(&self) {
        self.canceled.lock().unwrap().push(self.label.clone());
        self.state.cancel();
    }

    fn status(&self) -> UnitStatus {
        self.state.status()
    }
}

struct FakeLayer {
    name: String,
    upload: Option<Behavior>,
    save: Option<Behavior>,
    save_ready: bool,
    log: Log,
    canceled: Log,
    started: Arc<Notify>,
}

impl FakeLayer {
    fn unit(&self, phase: &str, behavior: Option<Behavior>) -> Option<Arc<dyn IoUnit>> {
        let behavior = behavior?;
        Some(Arc::new(FakeUnit {
            label: format!("{phase} {}", self.name),
            behavior,
            state: UnitState::default(),
            log: self.log.clone(),
            canceled: self.canceled.clone(),
            started: self.started.clone(),
        }))
    }
}

impl Layer for FakeLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn upload_unit(&self) -> Option<Arc<dyn IoUnit>> {
        self.unit("upload", self.upload)
    }

    fn save_unit(&self) -> Option<Arc<dyn IoUnit>> {
        self.unit("save", self.save)
    }

    fn check_save_conditions(&self) -> bool {
        self.save_ready
    }
}

/// Builds layers sharing one run log and one "unit started" signal.
#[derive(Default)]
struct Fixture {
    log: Log,
    canceled: Log,
    started: Arc<Notify>,
}

impl Fixture {
    fn entry(&self, name: &str, upload: Option<Behavior>, save: Option<Behavior>) -> LayerEntry {
        let layer = FakeLayer {
            name: name.into(),
            upload,
            save,
            save_ready: true,
            log: self.log.clone(),
            canceled: self.canceled.clone(),
            started: self.started.clone(),
        };
        LayerEntry::new(Arc::new(layer), upload.is_some(), save.is_some())
    }

    fn entry_with(&self, layer: FakeLayer, wants_upload: bool, wants_save: bool) -> LayerEntry {
        LayerEntry::new(Arc::new(layer), wants_upload, wants_save)
    }

    fn layer(&self, name: &str) -> FakeLayer {
        FakeLayer {
            name: name.into(),
            upload: None,
            save: None,
            save_ready: true,
            log: self.log.clone(),
            canceled: self.canceled.clone(),
            started: self.started.clone(),
        }
    }

    fn ran(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn canceled(&self) -> Vec<String> {
        self.canceled.lock().unwrap().clone()
    }
}

#[derive(Clone, Default)]
struct Reports(Arc<Mutex<Vec<(String, Phase, String)>>>);

impl ErrorReporter for Reports {
    fn report(&mut self, layer: &str, phase: Phase, cause: &FailureCause) {
        self.0
            .lock()
            .unwrap()
            .push((layer.to_string(), phase, cause.to_string()));
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        events.push(ev);
    }
    events
}

#[tokio::test(flavor = "multi_thread")]
async fn test_all_units_succeed() {
    use Behavior::*;
    let fx = Fixture::default();
    let warned = Arc::new(Mutex::new(0usize));
    let sink = warned.clone();
    let mut session = SaveSession::new().with_warning_sink(move |_: usize, _: usize| {
        *sink.lock().unwrap() += 1;
    });
    session
        .populate([
            fx.entry("a", Some(Succeed), Some(Succeed)),
            fx.entry("b", None, Some(Succeed)),
            fx.entry("c", Some(Succeed), None),
        ])
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    session.subscribe(EventForwarder::new(tx));

    let summary = session.run().await.unwrap();

    assert_eq!(summary.decision, Decision::Proceed);
    assert!(!summary.unresolved);
    assert_eq!(summary.problems(), 0);
    assert_eq!(fx.ran(), vec!["upload a", "upload c", "save a", "save b"]);
    assert_eq!(session.store().mode(), Mode::Editing);
    assert!(!session.store().has_unresolved());
    assert_eq!(*warned.lock().unwrap(), 0);

    let events = drain(&mut rx);
    let modes: Vec<Mode> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::ModeChanged { mode } => Some(*mode),
            _ => None,
        })
        .collect();
    assert_eq!(modes, vec![Mode::Busy, Mode::Editing]);

    let states: Vec<OrchestratorState> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::StateChanged { state } => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            OrchestratorState::RunningUpload,
            OrchestratorState::RunningSave,
            OrchestratorState::Finalizing,
            OrchestratorState::Idle,
        ]
    );

    // Every upload outcome is recorded before the first save outcome.
    let phases: Vec<Phase> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::OutcomeRecorded { phase, outcome, .. } => {
                assert_eq!(*outcome, OutcomeKind::Ok);
                Some(*phase)
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        phases,
        vec![Phase::Upload, Phase::Upload, Phase::Save, Phase::Save]
    );
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::Progress { message } if message == "Preparing layer 'a' for upload ..."
    )));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_before_run_cancels_everything() {
    let fx = Fixture::default();
    let warned = Arc::new(Mutex::new(Vec::new()));
    let sink = warned.clone();
    let mut session = SaveSession::new().with_warning_sink(move |canceled: usize, failed: usize| {
        sink.lock().unwrap().push((canceled, failed));
    });
    session
        .populate([
            fx.entry("a", None, Some(Behavior::Succeed)),
            fx.entry("b", None, Some(Behavior::Succeed)),
        ])
        .unwrap();

    let cancel = session.cancel_handle();
    cancel.cancel();
    let summary = session.run().await.unwrap();

    assert!(fx.ran().is_empty());
    assert_eq!(summary.canceled, 2);
    assert_eq!(summary.decision, Decision::Cancel);
    assert!(summary
        .layers
        .iter()
        .all(|l| l.save == OutcomeKind::Canceled && l.upload == OutcomeKind::Pending));
    assert_eq!(*warned.lock().unwrap(), vec![(2, 0)]);
    assert!(!cancel.is_requested());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_mid_flight_stops_remaining_items() {
    use Behavior::*;
    let fx = Fixture::default();
    let mut session = SaveSession::new();
    session
        .populate([
            fx.entry("slow", Some(BlockUntilCanceled), Some(Succeed)),
            fx.entry("next", Some(Succeed), None),
            fx.entry("last", None, Some(Succeed)),
        ])
        .unwrap();

    let cancel = session.cancel_handle();
    let started = fx.started.clone();
    let canceller = tokio::spawn(async move {
        started.notified().await;
        cancel.cancel();
    });

    let summary = session.run().await.unwrap();
    canceller.await.unwrap();

    assert_eq!(fx.ran(), vec!["upload slow"]);
    assert_eq!(summary.canceled, 4);
    assert_eq!(summary.failed, 0);
    assert!(summary.cancel_requested);
    assert_eq!(summary.decision, Decision::Cancel);
    let entries = session.store().entries();
    assert_eq!(entries[0].outcome(Phase::Upload).kind(), OutcomeKind::Canceled);
    assert_eq!(entries[2].outcome(Phase::Save).kind(), OutcomeKind::Canceled);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_item_failures_are_recorded_and_run_continues() {
    use Behavior::*;
    let fx = Fixture::default();
    let mut not_ready = fx.layer("not-ready");
    not_ready.save = Some(Succeed);
    not_ready.save_ready = false;
    let no_unit = fx.layer("no-unit");

    let mut session = SaveSession::new()
        .with_precondition_checker(|layer: &dyn Layer| layer.name() != "blocked")
        .with_confirmer(|entry: &LayerEntry| {
            if entry.name() == "declined" {
                Confirmation::Decline
            } else {
                Confirmation::Accept { remember: false }
            }
        });
    session
        .populate([
            fx.entry("blocked", Some(Succeed), None),
            fx.entry("declined", Some(Succeed), None),
            fx.entry_with(no_unit, true, false),
            fx.entry_with(not_ready, false, true),
            fx.entry("fine", Some(Succeed), Some(Fail)),
        ])
        .unwrap();

    let summary = session.run().await.unwrap();

    assert_eq!(fx.ran(), vec!["upload fine", "save fine"]);
    let kinds: Vec<(OutcomeKind, OutcomeKind)> =
        summary.layers.iter().map(|l| (l.upload, l.save)).collect();
    assert_eq!(
        kinds,
        vec![
            (OutcomeKind::Failed, OutcomeKind::Pending),
            (OutcomeKind::Canceled, OutcomeKind::Pending),
            (OutcomeKind::Failed, OutcomeKind::Pending),
            (OutcomeKind::Pending, OutcomeKind::Failed),
            (OutcomeKind::Ok, OutcomeKind::Failed),
        ]
    );
    assert_eq!(summary.failed, 4);
    assert_eq!(summary.canceled, 1);
    assert_eq!(summary.decision, Decision::Review);
    assert!(summary.layers[4]
        .save_cause
        .as_deref()
        .is_some_and(|c| c.contains("disk full")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_raised_and_panicking_units_are_reported() {
    use Behavior::*;
    let fx = Fixture::default();
    let reports = Reports::default();
    let mut session = SaveSession::new().with_error_reporter(reports.clone());
    session
        .populate([
            fx.entry("raises", Some(Raise), None),
            fx.entry("panics", None, Some(Panic)),
            fx.entry("after", None, Some(Succeed)),
        ])
        .unwrap();

    let summary = session.run().await.unwrap();

    assert_eq!(fx.ran(), vec!["upload raises", "save panics", "save after"]);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.layers[2].save, OutcomeKind::Ok);

    let reports = reports.0.lock().unwrap();
    assert_eq!(reports.len(), 2);
    assert_eq!((reports[0].0.as_str(), reports[0].1), ("raises", Phase::Upload));
    assert!(reports[0].2.contains("unit exploded"));
    assert_eq!((reports[1].0.as_str(), reports[1].1), ("panics", Phase::Save));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_remembered_accept_stops_prompting() {
    let fx = Fixture::default();
    let asked = Arc::new(Mutex::new(0usize));
    let counter = asked.clone();
    let mut session = SaveSession::new().with_confirmer(move |_: &LayerEntry| {
        *counter.lock().unwrap() += 1;
        Confirmation::Accept { remember: true }
    });
    session
        .populate(
            ["a", "b", "c"]
                .into_iter()
                .map(|name| fx.entry(name, Some(Behavior::Succeed), None)),
        )
        .unwrap();

    let summary = session.run().await.unwrap();

    assert_eq!(*asked.lock().unwrap(), 1);
    assert_eq!(fx.ran().len(), 3);
    assert_eq!(summary.decision, Decision::Proceed);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_session_proceeds() {
    let mut session = SaveSession::new();
    let summary = session.run().await.unwrap();
    assert_eq!(summary.decision, Decision::Proceed);
    assert!(summary.layers.is_empty());
    assert_eq!(session.store().mode(), Mode::Editing);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dropped_run_cancels_and_leaves_session_editable() {
    use Behavior::*;
    let fx = Fixture::default();
    let mut session = SaveSession::new();
    session
        .populate([fx.entry("stuck", None, Some(BlockUntilCanceled))])
        .unwrap();

    let timed_out = tokio::time::timeout(Duration::from_millis(200), session.run()).await;

    assert!(timed_out.is_err());
    assert_eq!(fx.ran(), vec!["save stuck"]);
    assert_eq!(fx.canceled(), vec!["save stuck"]);
    assert_eq!(session.store().mode(), Mode::Editing);
    assert!(!session.cancel_handle().is_requested());

    session
        .populate([fx.entry("again", None, Some(Succeed))])
        .unwrap();
    let summary = session.run().await.unwrap();
    assert_eq!(summary.decision, Decision::Proceed);
    assert_eq!(fx.ran(), vec!["save stuck", "save again"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_requeued_run_skips_passed_preconditions() {
    use Behavior::*;
    let fx = Fixture::default();
    let checks = Arc::new(Mutex::new(0usize));
    let counter = checks.clone();
    let mut session = SaveSession::new().with_precondition_checker(move |_: &dyn Layer| {
        *counter.lock().unwrap() += 1;
        true
    });
    session
        .populate([fx.entry("flaky", Some(Fail), None)])
        .unwrap();

    let first = session.run().await.unwrap();
    assert_eq!(first.decision, Decision::Review);
    assert_eq!(*checks.lock().unwrap(), 1);

    assert_eq!(session.requeue_unresolved().unwrap(), 1);
    let second = session.run().await.unwrap();

    assert_eq!(fx.ran(), vec!["upload flaky", "upload flaky"]);
    assert_eq!(second.failed, 1);
    assert_eq!(*checks.lock().unwrap(), 1);
}
