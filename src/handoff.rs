//! Synchronous hand-off from the orchestrator to the presentation side.
//!
//! The orchestrator never touches presentation state directly: it ships a closure
//! over a channel and waits until the presentation loop has run it.

use crate::error::HandOffError;
use crate::session::Presentation;
use tokio::sync::{mpsc, oneshot};

pub(crate) type Job = Box<dyn FnOnce(&mut Presentation) + Send>;

#[derive(Clone)]
pub struct UiHandle {
    tx: mpsc::UnboundedSender<Job>,
}

pub(crate) fn channel() -> (UiHandle, mpsc::UnboundedReceiver<Job>) {
    let (tx, rx) = mpsc::unbounded_channel::<Job>();
    (UiHandle { tx }, rx)
}

impl UiHandle {
    /// Run `f` on the presentation side and return its result once it has run.
    pub async fn run_and_wait<R, F>(&self, f: F) -> Result<R, HandOffError>
    where
        F: FnOnce(&mut Presentation) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel::<R>();
        let job: Job = Box::new(move |presentation| {
            let _ = reply_tx.send(f(presentation));
        });
        self.tx.send(job).map_err(|_| HandOffError::Closed)?;
        reply_rx.await.map_err(|_| HandOffError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Mode;

    #[tokio::test]
    async fn test_job_runs_before_reply() {
        let (ui, mut jobs) = channel();
        let serve = tokio::spawn(async move {
            let mut presentation = Presentation::default();
            while let Some(job) = jobs.recv().await {
                job(&mut presentation);
            }
            presentation.store().mode()
        });

        let mode = ui
            .run_and_wait(|p| {
                p.store_mut().set_mode(Mode::Busy);
                p.store().mode()
            })
            .await
            .unwrap();
        assert_eq!(mode, Mode::Busy);

        drop(ui);
        assert_eq!(serve.await.unwrap(), Mode::Busy);
    }

    #[tokio::test]
    async fn test_closed_presentation_is_an_error() {
        let (ui, jobs) = channel();
        drop(jobs);
        let err = ui.run_and_wait(|_| ()).await.unwrap_err();
        assert!(matches!(err, HandOffError::Closed));
    }
}
