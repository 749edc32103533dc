use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::WorkerRole;

/// Worker lifecycle. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum WorkerState {
    Uninitialized = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl WorkerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Uninitialized,
            1 => WorkerState::Running,
            2 => WorkerState::Stopping,
            _ => WorkerState::Stopped,
        }
    }
}

/// Lifecycle and diagnostics of one worker.
///
/// Written by the owning worker thread, polled by the controller.
#[derive(Debug)]
pub struct WorkerStatus {
    role: WorkerRole,
    state: AtomicU8,
    fatal: AtomicBool,
    processed: AtomicU64,
    discarded: AtomicU64,
    last_failure: Mutex<Option<String>>,
}

impl WorkerStatus {
    pub fn new(role: WorkerRole) -> Self {
        Self {
            role,
            state: AtomicU8::new(WorkerState::Uninitialized as u8),
            fatal: AtomicBool::new(false),
            processed: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            last_failure: Mutex::new(None),
        }
    }

    pub fn role(&self) -> WorkerRole {
        self.role
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Move to `next` if it is later in the lifecycle. Returns whether the state changed.
    pub fn advance(&self, next: WorkerState) -> bool {
        let changed = self
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                ((next as u8) > current).then_some(next as u8)
            })
            .is_ok();
        if changed {
            log::debug!("{} worker -> {:?}", self.role, next);
        }
        changed
    }

    pub fn record_failure(&self, reason: impl Into<String>) {
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }

    /// Record a failure that ended the worker.
    pub fn record_fatal(&self, reason: impl Into<String>) {
        self.record_failure(reason);
        self.fatal.store(true, Ordering::SeqCst);
    }

    pub fn last_failure(&self) -> Option<String> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    pub fn mark_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn mark_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            role: self.role,
            state: self.state(),
            processed: self.processed(),
            discarded: self.discarded(),
            fatal: self.is_fatal(),
            last_failure: self.last_failure(),
        }
    }
}

/// Serializable view of a `WorkerStatus`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub role: WorkerRole,
    pub state: WorkerState,
    /// Frames captured (capture worker) or results emitted (detection worker).
    pub processed: u64,
    /// Results thrown away because the result queue was full (detection worker).
    pub discarded: u64,
    pub fatal: bool,
    pub last_failure: Option<String>,
}

/// Marks a worker `Stopped` when its thread exits, including by panic.
pub(crate) struct StopOnExit(pub(crate) Arc<WorkerStatus>);

impl Drop for StopOnExit {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.record_fatal(format!("{} worker panicked", self.0.role()));
        }
        self.0.advance(WorkerState::Stopped);
    }
}
