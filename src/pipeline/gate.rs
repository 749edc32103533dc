use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use super::CancellationToken;

/// Detect signal shared by the controller and the detection worker.
///
/// While disabled the detection worker parks here and frames accumulate in the buffer
/// under its backpressure policy.
#[derive(Debug)]
pub struct DetectGate {
    enabled: Mutex<bool>,
    changed: Condvar,
}

impl DetectGate {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: Mutex::new(enabled),
            changed: Condvar::new(),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        *self.enabled.lock().unwrap_or_else(PoisonError::into_inner) = enabled;
        self.changed.notify_all();
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wake parked workers so they re-check cancellation.
    pub fn wake(&self) {
        self.changed.notify_all();
    }

    /// Block until detection is enabled. Returns `false` if cancelled first.
    ///
    /// Rechecks `cancel` every `poll`.
    pub fn wait_enabled(&self, cancel: &CancellationToken, poll: Duration) -> bool {
        let mut enabled = self.enabled.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if cancel.is_cancelled() {
                return false;
            }
            if *enabled {
                return true;
            }
            enabled = self
                .changed
                .wait_timeout(enabled, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
