use anyhow::{anyhow, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// One stage of the detection protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStage {
    Preprocess,
    Infer,
    Postprocess,
}

impl fmt::Display for DetectionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DetectionStage::Preprocess => "preprocess",
            DetectionStage::Infer => "infer",
            DetectionStage::Postprocess => "postprocess",
        })
    }
}

/// Model input derived from a frame. Holds no raw pixels.
#[derive(Clone, Debug)]
pub struct PreparedInput {
    pub seq: u64,
    /// Row-major luma grid, normalized to 0..=1.
    pub tensor: Vec<f32>,
    pub grid_width: u32,
    pub grid_height: u32,
    /// SHA-256 of the payload, for change detection.
    pub fingerprint: [u8; 32],
}

impl PreparedInput {
    /// Downsample `frame` into a `grid_width` x `grid_height` luma grid.
    ///
    /// Payloads are interpreted as packed RGB when the length matches, otherwise as
    /// single-channel bytes.
    pub fn luma_grid(frame: &Frame, grid_width: u32, grid_height: u32) -> Result<Self> {
        let pixels = frame.pixels();
        if pixels.is_empty() {
            return Err(anyhow!("empty frame payload"));
        }
        let (width, height) = (frame.width() as usize, frame.height() as usize);
        if width == 0 || height == 0 || grid_width == 0 || grid_height == 0 {
            return Err(anyhow!("invalid geometry {}x{}", width, height));
        }
        let channels = if pixels.len() == width * height * 3 {
            3
        } else if pixels.len() == width * height {
            1
        } else {
            return Err(anyhow!(
                "payload of {} bytes does not match {}x{}",
                pixels.len(),
                width,
                height
            ));
        };

        let (gw, gh) = (grid_width as usize, grid_height as usize);
        let mut sums = vec![0f32; gw * gh];
        let mut counts = vec![0u32; gw * gh];
        for y in 0..height {
            let cy = y * gh / height;
            for x in 0..width {
                let cx = x * gw / width;
                let base = (y * width + x) * channels;
                let luma = if channels == 3 {
                    0.299 * pixels[base] as f32
                        + 0.587 * pixels[base + 1] as f32
                        + 0.114 * pixels[base + 2] as f32
                } else {
                    pixels[base] as f32
                };
                sums[cy * gw + cx] += luma;
                counts[cy * gw + cx] += 1;
            }
        }
        let tensor = sums
            .iter()
            .zip(&counts)
            .map(|(sum, &count)| if count == 0 { 0.0 } else { sum / count as f32 / 255.0 })
            .collect();

        Ok(Self {
            seq: frame.seq(),
            tensor,
            grid_width,
            grid_height,
            fingerprint: Sha256::digest(pixels).into(),
        })
    }
}

/// Raw model output: one activation score per grid cell.
#[derive(Clone, Debug)]
pub struct RawOutput {
    pub seq: u64,
    pub scores: Vec<f32>,
    pub grid_width: u32,
    pub grid_height: u32,
}

/// Detector backend.
///
/// Backends are opaque, possibly slow and synchronous. Each instance is owned by exactly
/// one detection worker, so stages take `&mut self` and may keep state across frames.
/// Implementations must treat the frame as read-only and must not retain its pixels.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// One-time model/accelerator initialization, during pipeline start.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    fn preprocess(&mut self, frame: &Frame) -> Result<PreparedInput>;

    fn infer(&mut self, input: PreparedInput) -> Result<RawOutput>;

    fn postprocess(&mut self, output: RawOutput) -> Result<Vec<Detection>>;
}
