use serde::Serialize;
use std::time::Duration;

use super::WorkerSnapshot;
use crate::frame::BufferStats;

/// Controller lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Idle,
    Running,
    /// Started, but a worker has stopped on a fatal failure. `stop()` releases the rest.
    Degraded,
    Stopped,
    /// `start()` failed; everything it acquired has been released.
    Failed,
}

/// Polled view of the whole pipeline.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineDiagnostics {
    pub phase: PipelinePhase,
    pub capture: WorkerSnapshot,
    pub detection: WorkerSnapshot,
    pub buffer: BufferStats,
    pub detection_enabled: bool,
    pub stream_open: bool,
}

/// How a worker thread ended during `stop()`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerExit {
    /// Never spawned.
    NotStarted,
    Clean,
    /// Exited after recording a fatal failure.
    Failed(String),
    Panicked,
    /// Still running at the shutdown deadline; the thread was detached.
    TimedOut,
}

/// Outcome of `PipelineController::stop`.
#[derive(Clone, Debug, Serialize)]
pub struct ShutdownReport {
    pub capture: WorkerExit,
    pub detection: WorkerExit,
    pub buffer: BufferStats,
    /// Frames still buffered at shutdown and released unprocessed.
    pub drained_frames: usize,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub(crate) fn not_started() -> Self {
        Self {
            capture: WorkerExit::NotStarted,
            detection: WorkerExit::NotStarted,
            buffer: BufferStats::default(),
            drained_frames: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_clean(&self) -> bool {
        [&self.capture, &self.detection]
            .iter()
            .all(|exit| matches!(exit, WorkerExit::Clean | WorkerExit::NotStarted))
    }
}
