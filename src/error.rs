//! Typed pipeline errors.
//!
//! Per-frame failures stay inside the workers and are reported through
//! `DetectionResult` and diagnostics. Only init-time, fatal-capture and
//! shutdown failures reach the caller of `PipelineController`.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::detect::DetectionStage;

/// Startup step that failed during `PipelineController::start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitStep {
    Stream,
    CameraHardware,
    Audio,
    Detector,
    SpawnThread,
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InitStep::Stream => "stream",
            InitStep::CameraHardware => "camera hardware",
            InitStep::Audio => "audio",
            InitStep::Detector => "detector",
            InitStep::SpawnThread => "worker thread spawn",
        };
        f.write_str(label)
    }
}

/// Worker thread roles owned by the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Capture,
    Detection,
}

impl WorkerRole {
    pub fn label(self) -> &'static str {
        match self {
            WorkerRole::Capture => "capture",
            WorkerRole::Detection => "detection",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("{step} initialization failed: {reason}")]
    InitFailure { step: InitStep, reason: String },

    #[error("transient capture failure: {reason}")]
    TransientCaptureFailure { reason: String },

    #[error("fatal capture failure: {reason}")]
    FatalCaptureFailure { reason: String },

    #[error("{stage} failed for frame {seq}: {reason}")]
    DetectionStageFailure {
        stage: DetectionStage,
        seq: u64,
        reason: String,
    },

    #[error("workers did not stop within the shutdown window: {}", join_roles(.workers))]
    ShutdownTimeout { workers: Vec<WorkerRole> },

    #[error("pipeline already started")]
    AlreadyStarted,

    #[error("pipeline cannot be restarted after stop; build a new controller")]
    RestartUnsupported,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0} worker thread panicked")]
    ThreadPanicked(WorkerRole),
}

impl PipelineError {
    pub(crate) fn init(step: InitStep, err: impl fmt::Display) -> Self {
        PipelineError::InitFailure {
            step,
            reason: err.to_string(),
        }
    }
}

fn join_roles(workers: &[WorkerRole]) -> String {
    workers
        .iter()
        .map(|role| role.label())
        .collect::<Vec<_>>()
        .join(", ")
}
