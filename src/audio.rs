//! Audio subsystem.
//!
//! Audio is initialized after camera hardware and before the capture loop starts. The
//! pipeline only sequences its bring-up; sample handling is outside this crate.

use anyhow::Result;

pub trait AudioDevice: Send {
    fn name(&self) -> &str;

    /// One-time initialization during pipeline start.
    fn init(&mut self) -> Result<()>;
}

/// Audio device for robots without a microphone and for tests.
#[derive(Debug, Default)]
pub struct NullAudio {
    initialized: bool,
}

impl NullAudio {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

impl AudioDevice for NullAudio {
    fn name(&self) -> &str {
        "null"
    }

    fn init(&mut self) -> Result<()> {
        self.initialized = true;
        log::info!("audio: null device initialized");
        Ok(())
    }
}
