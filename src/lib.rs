//! Robot media pipeline
//!
//! This crate implements the coordination core of a robot's camera-to-detection path.
//!
//! # Architecture
//!
//! The pipeline holds four invariants by construction:
//!
//! 1. **Single hand-off**: `FrameBuffer` is the only state both worker threads mutate.
//! 2. **Bounded buffering**: occupancy never exceeds the configured capacity; overflow follows
//!    an explicit `BackpressurePolicy`.
//! 3. **Ordered results**: detection results leave in increasing frame sequence order.
//! 4. **Contained failures**: a failed frame only fails that frame; init and fatal capture
//!    failures reach the caller and leave the pipeline stopped, never half-running.
//!
//! # Module Structure
//!
//! - `frame`: `Frame`, `FrameBuffer`, backpressure policy
//! - `ingest`: camera sources (external hardware) and the synthetic `stub://` camera
//! - `audio`, `stream`: the other externally supplied devices
//! - `detect`: three-stage detection protocol and built-in backends
//! - `pipeline`: workers, cancellation, lifecycle controller, diagnostics
//! - `config`: file + environment configuration

pub mod audio;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod stream;

pub use audio::{AudioDevice, NullAudio};
pub use config::{BufferSettings, CameraSettings, DetectionSettings, PipelineConfig};
pub use detect::{
    BoundingBox, Detection, DetectionResult, DetectionStage, DetectionStatus, DetectorBackend,
    ObjectClass, PreparedInput, RawOutput,
};
pub use error::{InitStep, PipelineError, WorkerRole};
pub use frame::{BackpressurePolicy, BufferStats, Frame, FrameBuffer, PushOutcome};
pub use ingest::{CameraSource, CaptureError, RawCapture, SyntheticCamera};
pub use pipeline::{
    CancellationToken, MediaDevices, PipelineController, PipelineDiagnostics, PipelinePhase,
    ShutdownReport, WorkerExit, WorkerState,
};
pub use stream::{LoopbackStream, StreamConnector, StreamSession};
