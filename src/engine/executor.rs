use super::{CancelHandle, IoUnit};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// How the executor saw a submitted unit end.
#[derive(Debug, Clone)]
pub enum JobStatus {
    /// `run` returned normally; the unit's own status says whether it succeeded.
    Completed,
    /// Never started: the handle or the session was cancelled first.
    Canceled,
    /// `run` returned an error or panicked.
    Raised(Arc<anyhow::Error>),
    /// The executor went away before reporting a result.
    Interrupted(String),
}

struct Job {
    unit: Arc<dyn IoUnit>,
    aborted: Arc<AtomicBool>,
    done: oneshot::Sender<JobStatus>,
}

/// Waitable, cancellable handle for one submitted unit.
pub struct UnitHandle {
    unit: Arc<dyn IoUnit>,
    aborted: Arc<AtomicBool>,
    done: oneshot::Receiver<JobStatus>,
}

impl UnitHandle {
    /// Skip the unit if it has not started yet, otherwise ask it to stop.
    pub fn cancel(&self) {
        self.aborted.store(true, Ordering::SeqCst);
        self.unit.cancel();
    }

    pub async fn wait(self) -> JobStatus {
        match self.done.await {
            Ok(status) => status,
            Err(_) => JobStatus::Interrupted(format!(
                "executor shut down before '{}' finished",
                self.unit.label()
            )),
        }
    }
}

/// FIFO work queue drained by exactly one worker task.
pub struct SingleExecutor {
    queue: Option<mpsc::UnboundedSender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl SingleExecutor {
    /// Spawn the worker. Must be called from within a tokio runtime.
    pub fn new(cancel: CancelHandle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let worker = tokio::spawn(worker_loop(rx, cancel));
        Self {
            queue: Some(tx),
            worker: Some(worker),
        }
    }

    pub fn submit(&self, unit: Arc<dyn IoUnit>) -> UnitHandle {
        let (done_tx, done_rx) = oneshot::channel();
        let aborted = Arc::new(AtomicBool::new(false));
        let job = Job {
            unit: unit.clone(),
            aborted: aborted.clone(),
            done: done_tx,
        };
        match self.queue.as_ref() {
            Some(queue) => {
                if queue.send(job).is_err() {
                    tracing::warn!(unit = unit.label(), "executor queue closed, unit dropped");
                }
            }
            None => tracing::warn!(unit = unit.label(), "submit after shutdown, unit dropped"),
        }
        UnitHandle {
            unit,
            aborted,
            done: done_rx,
        }
    }

    /// Stop accepting work and release the worker. Queued units are discarded.
    pub fn shutdown(&mut self) {
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

impl Drop for SingleExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Clears the in-flight slot even if the worker is aborted mid-unit.
struct InFlight<'a>(&'a CancelHandle);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.end();
    }
}

async fn worker_loop(mut rx: mpsc::UnboundedReceiver<Job>, cancel: CancelHandle) {
    while let Some(job) = rx.recv().await {
        let Job {
            unit,
            aborted,
            done,
        } = job;

        if aborted.load(Ordering::SeqCst) || !cancel.begin(unit.clone()) {
            tracing::debug!(unit = unit.label(), "skipping cancelled unit");
            let _ = done.send(JobStatus::Canceled);
            continue;
        }
        let guard = InFlight(&cancel);

        tracing::debug!(unit = unit.label(), "unit started");
        let runner = unit.clone();
        let result = AssertUnwindSafe(async move { runner.run().await })
            .catch_unwind()
            .await;
        drop(guard);

        let status = match result {
            Ok(Ok(())) => JobStatus::Completed,
            Ok(Err(e)) => JobStatus::Raised(Arc::new(e)),
            Err(payload) => JobStatus::Raised(Arc::new(anyhow::anyhow!(
                "unit '{}' panicked: {}",
                unit.label(),
                panic_message(payload.as_ref())
            ))),
        };
        tracing::debug!(unit = unit.label(), ?status, "unit finished");
        let _ = done.send(status);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
