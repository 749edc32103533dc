use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::detect::BACKEND_NAMES;
use crate::error::PipelineError;
use crate::frame::{BackpressurePolicy, DEFAULT_BUFFER_CAPACITY, MAX_BUFFER_CAPACITY};

type Result<T> = std::result::Result<T, PipelineError>;

const DEFAULT_CAMERA_URL: &str = "stub://robot_camera";
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 15;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_RESULT_CAPACITY: usize = 32;
const DEFAULT_STREAM_ENDPOINT: &str = "loopback://robot_media";
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_IDLE_POLL_MS: u64 = 50;

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    buffer: Option<BufferConfigFile>,
    camera: Option<CameraConfigFile>,
    detection: Option<DetectionConfigFile>,
    stream: Option<StreamConfigFile>,
    shutdown_timeout_ms: Option<u64>,
    idle_poll_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct BufferConfigFile {
    capacity: Option<usize>,
    policy: Option<BackpressurePolicy>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    frame_limit: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
    backend: Option<String>,
    start_enabled: Option<bool>,
    max_frame_age_ms: Option<u64>,
    result_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub buffer: BufferSettings,
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub stream_endpoint: String,
    /// Bounded join window for `stop()`.
    pub shutdown_timeout: Duration,
    /// Longest a worker waits before rechecking cancellation.
    pub idle_poll_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSettings {
    pub capacity: usize,
    pub policy: BackpressurePolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// Stop after this many frames (finite sources).
    pub frame_limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionSettings {
    pub backend: String,
    pub start_enabled: bool,
    /// Frames older than this when dequeued are skipped.
    pub max_frame_age: Option<Duration>,
    /// Results held for the caller before new ones are discarded.
    pub result_capacity: usize,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUFFER_CAPACITY,
            policy: BackpressurePolicy::DropOldest,
        }
    }
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_CAMERA_URL.to_string(),
            width: DEFAULT_CAMERA_WIDTH,
            height: DEFAULT_CAMERA_HEIGHT,
            target_fps: DEFAULT_CAMERA_FPS,
            frame_limit: None,
        }
    }
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_BACKEND.to_string(),
            start_enabled: true,
            max_frame_age: None,
            result_capacity: DEFAULT_RESULT_CAPACITY,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            buffer: BufferSettings::default(),
            camera: CameraSettings::default(),
            detection: DetectionSettings::default(),
            stream_endpoint: DEFAULT_STREAM_ENDPOINT.to_string(),
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
            idle_poll_interval: Duration::from_millis(DEFAULT_IDLE_POLL_MS),
        }
    }
}

impl PipelineConfig {
    /// Load from `ROBOT_MEDIA_CONFIG` (if set), then apply `ROBOT_MEDIA_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ROBOT_MEDIA_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load a config file without consulting the environment.
    pub fn from_path(path: &Path) -> Result<Self> {
        let cfg = Self::from_file(read_config_file(path)?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PipelineConfigFile) -> Self {
        let defaults = Self::default();
        let buffer = file.buffer.unwrap_or_default();
        let camera = file.camera.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        Self {
            buffer: BufferSettings {
                capacity: buffer.capacity.unwrap_or(defaults.buffer.capacity),
                policy: buffer.policy.unwrap_or(defaults.buffer.policy),
            },
            camera: CameraSettings {
                url: camera.url.unwrap_or(defaults.camera.url),
                width: camera.width.unwrap_or(defaults.camera.width),
                height: camera.height.unwrap_or(defaults.camera.height),
                target_fps: camera.target_fps.unwrap_or(defaults.camera.target_fps),
                frame_limit: camera.frame_limit,
            },
            detection: DetectionSettings {
                backend: detection.backend.unwrap_or(defaults.detection.backend),
                start_enabled: detection
                    .start_enabled
                    .unwrap_or(defaults.detection.start_enabled),
                max_frame_age: detection.max_frame_age_ms.map(Duration::from_millis),
                result_capacity: detection
                    .result_capacity
                    .unwrap_or(defaults.detection.result_capacity),
            },
            stream_endpoint: file
                .stream
                .and_then(|stream| stream.endpoint)
                .unwrap_or(defaults.stream_endpoint),
            shutdown_timeout: file
                .shutdown_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_timeout),
            idle_poll_interval: file
                .idle_poll_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_poll_interval),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(capacity) = env_value("ROBOT_MEDIA_BUFFER_CAPACITY") {
            self.buffer.capacity = capacity.parse().map_err(|_| {
                PipelineError::Config("ROBOT_MEDIA_BUFFER_CAPACITY must be an integer".into())
            })?;
        }
        if let Some(policy) = env_value("ROBOT_MEDIA_POLICY") {
            self.buffer.policy = policy.parse()?;
        }
        if let Some(url) = env_value("ROBOT_MEDIA_CAMERA_URL") {
            self.camera.url = url;
        }
        if let Some(backend) = env_value("ROBOT_MEDIA_BACKEND") {
            self.detection.backend = backend;
        }
        if let Some(timeout) = env_value("ROBOT_MEDIA_SHUTDOWN_TIMEOUT_MS") {
            let millis: u64 = timeout.parse().map_err(|_| {
                PipelineError::Config(
                    "ROBOT_MEDIA_SHUTDOWN_TIMEOUT_MS must be an integer number of milliseconds"
                        .into(),
                )
            })?;
            self.shutdown_timeout = Duration::from_millis(millis);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer.capacity == 0 || self.buffer.capacity > MAX_BUFFER_CAPACITY {
            return Err(PipelineError::Config(format!(
                "buffer capacity must be in 1..={}",
                MAX_BUFFER_CAPACITY
            )));
        }
        if self.detection.result_capacity == 0
            || self.detection.result_capacity > MAX_BUFFER_CAPACITY
        {
            return Err(PipelineError::Config(format!(
                "detection result_capacity must be in 1..={}",
                MAX_BUFFER_CAPACITY
            )));
        }
        if self.camera.target_fps == 0 {
            return Err(PipelineError::Config("camera target_fps must be >= 1".into()));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(PipelineError::Config(
                "camera width and height must be non-zero".into(),
            ));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(PipelineError::Config(
                "shutdown timeout must be greater than zero".into(),
            ));
        }
        if self.idle_poll_interval.is_zero() {
            return Err(PipelineError::Config(
                "idle poll interval must be greater than zero".into(),
            ));
        }
        if !BACKEND_NAMES.contains(&self.detection.backend.as_str()) {
            return Err(PipelineError::Config(format!(
                "unknown detector backend '{}'",
                self.detection.backend
            )));
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::Config(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    let parsed = if path.extension().is_some_and(|ext| ext == "toml") {
        toml::from_str(&raw).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| {
        PipelineError::Config(format!("invalid config file {}: {}", path.display(), e))
    })
}
