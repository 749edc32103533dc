use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use crate::detect::backend::{DetectionStage, DetectorBackend};
use crate::detect::result::{Detection, DetectionResult, DetectionStatus};
use crate::error::PipelineError;
use crate::frame::Frame;

/// Run preprocess, infer and postprocess in order, stopping at the first failing stage.
///
/// A panicking stage is reported as that stage's failure.
pub fn run_stages(
    backend: &mut dyn DetectorBackend,
    frame: &Frame,
) -> Result<Vec<Detection>, PipelineError> {
    let seq = frame.seq();
    let prepared = stage(seq, DetectionStage::Preprocess, || backend.preprocess(frame))?;
    let output = stage(seq, DetectionStage::Infer, || backend.infer(prepared))?;
    stage(seq, DetectionStage::Postprocess, || backend.postprocess(output))
}

fn stage<T>(
    seq: u64,
    stage: DetectionStage,
    run: impl FnOnce() -> anyhow::Result<T>,
) -> Result<T, PipelineError> {
    let reason = match catch_unwind(AssertUnwindSafe(run)) {
        Ok(Ok(value)) => return Ok(value),
        Ok(Err(err)) => err.to_string(),
        Err(_) => "stage panicked".to_string(),
    };
    Err(PipelineError::DetectionStageFailure { stage, seq, reason })
}

/// Detection protocol for one frame. Never fails: stage errors become `Failed` results.
pub fn run_protocol(backend: &mut dyn DetectorBackend, frame: &Frame) -> DetectionResult {
    let started = Instant::now();
    let (detections, status) = match run_stages(backend, frame) {
        Ok(detections) => (detections, DetectionStatus::Success),
        Err(err) => {
            log::warn!("detection [{}]: {}", backend.name(), err);
            (Vec::new(), DetectionStatus::Failed(err.to_string()))
        }
    };
    DetectionResult {
        seq: frame.seq(),
        detections,
        status,
        latency: started.elapsed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backend::{PreparedInput, RawOutput};
    use anyhow::{anyhow, Result};

    /// Records stage order; fails or panics in `infer` on request.
    struct Scripted {
        calls: Vec<&'static str>,
        infer_fault: Option<&'static str>,
    }

    impl DetectorBackend for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn preprocess(&mut self, frame: &Frame) -> Result<PreparedInput> {
            self.calls.push("preprocess");
            PreparedInput::luma_grid(frame, 1, 1)
        }

        fn infer(&mut self, input: PreparedInput) -> Result<RawOutput> {
            self.calls.push("infer");
            match self.infer_fault {
                Some("error") => Err(anyhow!("accelerator busy")),
                Some(_) => panic!("model crashed"),
                None => Ok(RawOutput {
                    seq: input.seq,
                    scores: input.tensor,
                    grid_width: 1,
                    grid_height: 1,
                }),
            }
        }

        fn postprocess(&mut self, _output: RawOutput) -> Result<Vec<Detection>> {
            self.calls.push("postprocess");
            Ok(Vec::new())
        }
    }

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, vec![128; 4], 2, 2)
    }

    #[test]
    fn stages_run_in_order() {
        let mut backend = Scripted {
            calls: Vec::new(),
            infer_fault: None,
        };
        let result = run_protocol(&mut backend, &frame(3));
        assert_eq!(result.seq, 3);
        assert!(result.is_success());
        assert_eq!(backend.calls, vec!["preprocess", "infer", "postprocess"]);
    }

    #[test]
    fn failing_stage_short_circuits() {
        let mut backend = Scripted {
            calls: Vec::new(),
            infer_fault: Some("error"),
        };
        let err = run_stages(&mut backend, &frame(4)).unwrap_err();
        match err {
            PipelineError::DetectionStageFailure { stage, seq, reason } => {
                assert_eq!(stage, DetectionStage::Infer);
                assert_eq!(seq, 4);
                assert!(reason.contains("accelerator busy"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(backend.calls, vec!["preprocess", "infer"]);
    }

    #[test]
    fn panicking_stage_becomes_failed_result() {
        let mut backend = Scripted {
            calls: Vec::new(),
            infer_fault: Some("panic"),
        };
        let result = run_protocol(&mut backend, &frame(5));
        match result.status {
            DetectionStatus::Failed(reason) => assert!(reason.contains("infer")),
            other => panic!("unexpected status {other:?}"),
        }
    }
}
