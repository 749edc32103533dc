//! Object detection.
//!
//! Detection runs as three strictly ordered stages per frame:
//! `preprocess(frame) -> PreparedInput`, `infer(PreparedInput) -> RawOutput`,
//! `postprocess(RawOutput) -> detections`. Backends supply the stages; `run_protocol`
//! sequences them and contains failures to the frame being processed.

mod backend;
pub mod backends;
mod protocol;
mod result;

pub use backend::{DetectionStage, DetectorBackend, PreparedInput, RawOutput};
pub use backends::{backend_from_name, CpuBackend, StubBackend, BACKEND_NAMES};
pub use protocol::{run_protocol, run_stages};
pub use result::{BoundingBox, Detection, DetectionResult, DetectionStatus, ObjectClass};
