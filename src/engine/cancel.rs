use super::IoUnit;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

/// The cancel entry point shared by presentation, signal handlers and the executor.
///
/// Cancelling sets the flag checked before each new item and forwards a cancel
/// to the unit currently in flight, if any.
#[derive(Clone, Default)]
pub struct CancelHandle {
    requested: Arc<AtomicBool>,
    current: Arc<Mutex<Option<Arc<dyn IoUnit>>>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.requested.store(true, Ordering::SeqCst);
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(unit) = current.as_ref() {
            tracing::debug!(unit = unit.label(), "forwarding cancel to in-flight unit");
            unit.cancel();
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Clear the flag so a later run starts fresh.
    pub(crate) fn reset(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }

    /// Install `unit` as the in-flight unit unless a cancel already arrived.
    ///
    /// The flag is checked under the same lock `cancel` takes, so a request either
    /// prevents the start or reaches the installed unit.
    pub(crate) fn begin(&self, unit: Arc<dyn IoUnit>) -> bool {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_requested() {
            return false;
        }
        *current = Some(unit);
        true
    }

    pub(crate) fn end(&self) {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub(crate) fn has_in_flight(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("requested", &self.is_requested())
            .field("in_flight", &self.has_in_flight())
            .finish()
    }
}
