//! Pipeline coordination.
//!
//! Two long-lived threads, one per role:
//! - capture worker: camera -> `FrameBuffer`
//! - detection worker: `FrameBuffer` -> detector stages -> results channel
//!
//! `PipelineController` sequences device init, owns both threads, and tears everything
//! down on `stop()`. The buffer and the cancellation token are the only state the two
//! workers share.

mod cancel;
mod capture;
mod controller;
mod detection;
mod diagnostics;
mod gate;
mod state;

pub use cancel::CancellationToken;
pub use capture::CaptureWorker;
pub use controller::{MediaDevices, PipelineController};
pub use detection::DetectionWorker;
pub use diagnostics::{PipelineDiagnostics, PipelinePhase, ShutdownReport, WorkerExit};
pub use gate::DetectGate;
pub use state::{WorkerSnapshot, WorkerState, WorkerStatus};
