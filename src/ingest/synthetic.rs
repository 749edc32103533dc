//! Synthetic camera for `stub://` URLs.
//!
//! Generates a drifting gradient with a little sensor noise so the detection backends see
//! changing scenes. Paces itself to `target_fps` the way a real sensor blocks between frames.

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

use super::{CameraSource, CaptureError, RawCapture};
use crate::config::CameraSettings;

/// Frames between scene changes.
const SCENE_PERIOD: u64 = 30;

pub struct SyntheticCamera {
    settings: CameraSettings,
    rng: StdRng,
    frames_captured: u64,
    scene_state: u8,
    initialized: bool,
    last_read: Option<Instant>,
}

impl SyntheticCamera {
    pub fn new(settings: CameraSettings) -> Self {
        Self {
            settings,
            rng: StdRng::from_entropy(),
            frames_captured: 0,
            scene_state: 0,
            initialized: false,
            last_read: None,
        }
    }

    /// Deterministic noise, for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames_captured
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.settings.target_fps.max(1)
    }

    fn pace(&mut self) {
        let interval = self.frame_interval();
        if let Some(last) = self.last_read {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_read = Some(Instant::now());
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let width = self.settings.width as usize;
        let height = self.settings.height as usize;
        if self.frames_captured % SCENE_PERIOD == 0 {
            self.scene_state = self.scene_state.wrapping_add(37);
        }
        let offset = self.scene_state as usize;
        let mut pixels = vec![0u8; width * height * 3];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            let base = ((i / 3) % width.max(1) + offset) % 256;
            let noise: u8 = self.rng.gen_range(0..4);
            *pixel = (base as u8).wrapping_add(noise);
        }
        pixels
    }
}

impl CameraSource for SyntheticCamera {
    fn name(&self) -> &str {
        &self.settings.url
    }

    fn init(&mut self) -> Result<()> {
        if self.settings.width == 0 || self.settings.height == 0 {
            return Err(anyhow!(
                "invalid sensor geometry {}x{}",
                self.settings.width,
                self.settings.height
            ));
        }
        self.initialized = true;
        log::info!(
            "SyntheticCamera: {} ready at {}x{} @ {} fps",
            self.settings.url,
            self.settings.width,
            self.settings.height,
            self.settings.target_fps
        );
        Ok(())
    }

    fn read_frame(&mut self) -> std::result::Result<RawCapture, CaptureError> {
        if !self.initialized {
            return Err(CaptureError::Fatal("camera not initialized".to_string()));
        }
        if let Some(limit) = self.settings.frame_limit {
            if self.frames_captured >= limit {
                return Err(CaptureError::EndOfStream);
            }
        }
        self.pace();
        let data = self.generate_pixels();
        self.frames_captured += 1;
        Ok(RawCapture {
            data,
            width: self.settings.width,
            height: self.settings.height,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_settings() -> CameraSettings {
        CameraSettings {
            url: "stub://test".to_string(),
            width: 8,
            height: 4,
            target_fps: 1000,
            frame_limit: Some(3),
        }
    }

    #[test]
    fn read_before_init_is_fatal() {
        let mut camera = SyntheticCamera::new(small_settings());
        assert!(matches!(camera.read_frame(), Err(CaptureError::Fatal(_))));
    }

    #[test]
    fn stops_at_frame_limit() {
        let mut camera = SyntheticCamera::new(small_settings()).with_seed(1);
        camera.init().unwrap();
        for _ in 0..3 {
            let capture = camera.read_frame().unwrap();
            assert_eq!(capture.data.len(), 8 * 4 * 3);
        }
        assert!(matches!(camera.read_frame(), Err(CaptureError::EndOfStream)));
        assert_eq!(camera.frames_captured(), 3);
    }

    #[test]
    fn zero_geometry_fails_init() {
        let mut settings = small_settings();
        settings.width = 0;
        let mut camera = SyntheticCamera::new(settings);
        assert!(camera.init().is_err());
    }
}
