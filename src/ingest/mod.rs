//! Camera sources.
//!
//! Camera hardware is an external collaborator. The capture worker drives a `CameraSource`
//! through two calls:
//! - `init`: one-time hardware bring-up, before the capture loop starts
//! - `read_frame`: acquire the next raw capture, blocking at most one frame interval
//!
//! Sources produce `RawCapture` values; the capture worker wraps them into sequenced
//! `Frame`s. Sources MUST NOT retain captured bytes after handing them over.

pub mod synthetic;

use anyhow::{anyhow, Result};
use thiserror::Error;

use crate::config::CameraSettings;

pub use synthetic::SyntheticCamera;

/// Raw bytes from one hardware read, before sequencing.
#[derive(Debug)]
pub struct RawCapture {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Why `read_frame` produced no capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// This frame is lost; the next read may succeed.
    #[error("transient read failure: {0}")]
    Transient(String),
    /// The device is gone; no further reads will succeed.
    #[error("fatal device failure: {0}")]
    Fatal(String),
    /// A finite source has no more frames.
    #[error("end of stream")]
    EndOfStream,
}

/// Camera hardware driver.
pub trait CameraSource: Send {
    /// Device identifier for logs and diagnostics.
    fn name(&self) -> &str;

    /// One-time hardware initialization.
    fn init(&mut self) -> Result<()>;

    /// Acquire the next frame.
    fn read_frame(&mut self) -> std::result::Result<RawCapture, CaptureError>;

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Build the camera named by `settings.url`.
///
/// Only `stub://` sources are built in; hardware drivers are supplied by the embedding
/// application through `MediaDevices`.
pub fn camera_from_settings(settings: &CameraSettings) -> Result<Box<dyn CameraSource>> {
    if settings.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticCamera::new(settings.clone())));
    }
    Err(anyhow!(
        "no built-in camera driver for '{}' (only stub:// sources)",
        settings.url
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_url_builds_synthetic_camera() {
        let settings = CameraSettings::default();
        let camera = camera_from_settings(&settings).expect("stub camera");
        assert!(camera.name().starts_with("stub://"));
    }

    #[test]
    fn hardware_url_is_rejected() {
        let settings = CameraSettings {
            url: "v4l2:///dev/video0".to_string(),
            ..CameraSettings::default()
        };
        assert!(camera_from_settings(&settings).is_err());
    }
}
