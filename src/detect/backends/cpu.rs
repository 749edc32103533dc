use anyhow::{anyhow, Result};

use crate::detect::backend::{DetectorBackend, PreparedInput, RawOutput};
use crate::detect::result::{BoundingBox, Detection, ObjectClass};
use crate::frame::Frame;

const GRID_WIDTH: u32 = 16;
const GRID_HEIGHT: u32 = 12;
/// Per-cell luma change that counts as activity.
const DEFAULT_THRESHOLD: f32 = 0.08;
/// Boxes covering more than this share of the frame are reported as obstacles.
const OBSTACLE_AREA: f32 = 0.25;

/// CPU backend: frame-differencing over a coarse luma grid.
///
/// Active cells are merged into one bounding box per frame.
pub struct CpuBackend {
    threshold: f32,
    previous: Option<Vec<f32>>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_THRESHOLD)
    }

    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold,
            previous: None,
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn warm_up(&mut self) -> Result<()> {
        if !(0.0..1.0).contains(&self.threshold) {
            return Err(anyhow!("threshold {} outside 0..1", self.threshold));
        }
        self.previous = None;
        Ok(())
    }

    fn preprocess(&mut self, frame: &Frame) -> Result<PreparedInput> {
        PreparedInput::luma_grid(frame, GRID_WIDTH, GRID_HEIGHT)
    }

    fn infer(&mut self, input: PreparedInput) -> Result<RawOutput> {
        let scores = match &self.previous {
            Some(prev) if prev.len() == input.tensor.len() => prev
                .iter()
                .zip(&input.tensor)
                .map(|(a, b)| (a - b).abs())
                .collect(),
            _ => vec![0.0; input.tensor.len()],
        };
        self.previous = Some(input.tensor);
        Ok(RawOutput {
            seq: input.seq,
            scores,
            grid_width: input.grid_width,
            grid_height: input.grid_height,
        })
    }

    fn postprocess(&mut self, output: RawOutput) -> Result<Vec<Detection>> {
        let (gw, gh) = (output.grid_width as usize, output.grid_height as usize);
        if output.scores.len() != gw * gh {
            return Err(anyhow!(
                "expected {} scores, got {}",
                gw * gh,
                output.scores.len()
            ));
        }

        let mut bounds: Option<(usize, usize, usize, usize)> = None;
        let mut peak = 0f32;
        for (idx, &score) in output.scores.iter().enumerate() {
            if score < self.threshold {
                continue;
            }
            let (cx, cy) = (idx % gw, idx / gw);
            peak = peak.max(score);
            bounds = Some(match bounds {
                None => (cx, cy, cx, cy),
                Some((x0, y0, x1, y1)) => (x0.min(cx), y0.min(cy), x1.max(cx), y1.max(cy)),
            });
        }

        let Some((x0, y0, x1, y1)) = bounds else {
            return Ok(Vec::new());
        };
        let bbox = BoundingBox {
            x: x0 as f32 / gw as f32,
            y: y0 as f32 / gh as f32,
            w: (x1 - x0 + 1) as f32 / gw as f32,
            h: (y1 - y0 + 1) as f32 / gh as f32,
        };
        let class = if bbox.area() > OBSTACLE_AREA {
            ObjectClass::Obstacle
        } else {
            ObjectClass::Motion
        };
        Ok(vec![Detection {
            class,
            confidence: peak.min(1.0),
            bbox,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::run_protocol;

    const W: u32 = 32;
    const H: u32 = 24;

    fn frame_with_patch(seq: u64, patch: Option<(u32, u32, u32, u32)>) -> Frame {
        let mut pixels = vec![0u8; (W * H) as usize];
        if let Some((px, py, pw, ph)) = patch {
            for y in py..py + ph {
                for x in px..px + pw {
                    pixels[(y * W + x) as usize] = 255;
                }
            }
        }
        Frame::new(seq, pixels, W, H)
    }

    #[test]
    fn still_scene_has_no_detections() {
        let mut backend = CpuBackend::new();
        backend.warm_up().unwrap();
        for seq in 1..=3 {
            let result = run_protocol(&mut backend, &frame_with_patch(seq, None));
            assert!(result.is_success());
            assert!(result.detections.is_empty());
        }
    }

    #[test]
    fn moving_patch_is_boxed() {
        let mut backend = CpuBackend::new();
        backend.warm_up().unwrap();
        run_protocol(&mut backend, &frame_with_patch(1, None));

        // 4x4 patch in the top-left 2x2 grid cells.
        let result = run_protocol(&mut backend, &frame_with_patch(2, Some((0, 0, 4, 4))));
        assert_eq!(result.detections.len(), 1);
        let det = &result.detections[0];
        assert_eq!(det.class, ObjectClass::Motion);
        assert_eq!(det.bbox.x, 0.0);
        assert_eq!(det.bbox.y, 0.0);
        assert_eq!(det.bbox.w, 2.0 / GRID_WIDTH as f32);
        assert_eq!(det.bbox.h, 2.0 / GRID_HEIGHT as f32);
        assert!(det.confidence > 0.9);
    }

    #[test]
    fn large_change_is_an_obstacle() {
        let mut backend = CpuBackend::new();
        run_protocol(&mut backend, &frame_with_patch(1, None));
        let result = run_protocol(&mut backend, &frame_with_patch(2, Some((0, 0, W, H))));
        assert_eq!(result.detections[0].class, ObjectClass::Obstacle);
    }

    #[test]
    fn invalid_threshold_fails_warm_up() {
        let mut backend = CpuBackend::with_threshold(1.5);
        assert!(backend.warm_up().is_err());
    }
}
