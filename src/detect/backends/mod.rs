pub mod cpu;
pub mod stub;

use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;

pub use cpu::CpuBackend;
pub use stub::StubBackend;

/// Names accepted by `backend_from_name`.
pub const BACKEND_NAMES: &[&str] = &["stub", "cpu"];

/// Construct a built-in backend by name.
pub fn backend_from_name(name: &str) -> Result<Box<dyn DetectorBackend>> {
    match name {
        "stub" => Ok(Box::new(StubBackend::new())),
        "cpu" => Ok(Box::new(CpuBackend::new())),
        other => Err(anyhow!(
            "unknown detector backend '{}' (expected one of {})",
            other,
            BACKEND_NAMES.join(", ")
        )),
    }
}
