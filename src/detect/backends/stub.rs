use anyhow::Result;

use crate::detect::backend::{DetectorBackend, PreparedInput, RawOutput};
use crate::detect::result::{BoundingBox, Detection, ObjectClass};
use crate::frame::Frame;

const STUB_CONFIDENCE: f32 = 0.85;

/// Stub backend for testing. Reports full-frame motion whenever the payload hash changes.
#[derive(Default)]
pub struct StubBackend {
    last_fingerprint: Option<[u8; 32]>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn preprocess(&mut self, frame: &Frame) -> Result<PreparedInput> {
        PreparedInput::luma_grid(frame, 1, 1)
    }

    fn infer(&mut self, input: PreparedInput) -> Result<RawOutput> {
        let motion = self
            .last_fingerprint
            .is_some_and(|prev| prev != input.fingerprint);
        self.last_fingerprint = Some(input.fingerprint);

        Ok(RawOutput {
            seq: input.seq,
            scores: vec![if motion { STUB_CONFIDENCE } else { 0.0 }],
            grid_width: 1,
            grid_height: 1,
        })
    }

    fn postprocess(&mut self, output: RawOutput) -> Result<Vec<Detection>> {
        let score = output.scores.first().copied().unwrap_or_default();
        if score <= 0.0 {
            return Ok(Vec::new());
        }
        Ok(vec![Detection {
            class: ObjectClass::Motion,
            confidence: score,
            bbox: BoundingBox {
                x: 0.0,
                y: 0.0,
                w: 1.0,
                h: 1.0,
            },
        }])
    }
}
