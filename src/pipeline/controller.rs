use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::{
    CancellationToken, CaptureWorker, DetectGate, DetectionWorker, PipelineDiagnostics,
    PipelinePhase, ShutdownReport, WorkerExit, WorkerState, WorkerStatus,
};
use crate::audio::{AudioDevice, NullAudio};
use crate::config::PipelineConfig;
use crate::detect::{backend_from_name, DetectionResult, DetectorBackend};
use crate::error::{InitStep, PipelineError, WorkerRole};
use crate::frame::FrameBuffer;
use crate::ingest::{camera_from_settings, CameraSource};
use crate::stream::{LoopbackStream, StreamConnector, StreamSession};

/// Granularity of the bounded join loop.
const JOIN_POLL: Duration = Duration::from_millis(5);

/// External collaborators handed to the controller. Each is moved to exactly one owner
/// when the pipeline starts.
pub struct MediaDevices {
    pub camera: Box<dyn CameraSource>,
    pub audio: Box<dyn AudioDevice>,
    pub stream: Box<dyn StreamConnector>,
    pub detector: Box<dyn DetectorBackend>,
}

impl MediaDevices {
    /// Built-in devices named by the config (synthetic camera, null audio, loopback stream).
    pub fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
        Ok(Self {
            camera: camera_from_settings(&config.camera)?,
            audio: Box::new(NullAudio::new()),
            stream: Box::new(LoopbackStream::new(config.stream_endpoint.clone())),
            detector: backend_from_name(&config.detection.backend)?,
        })
    }
}

/// Owns the pipeline lifecycle.
///
/// `start()` either brings up every device and both workers or leaves the pipeline
/// `Failed` with everything released. `stop()` is idempotent and always returns within
/// the configured shutdown window. A stopped controller cannot be restarted; build a new
/// one with fresh devices instead.
pub struct PipelineController {
    config: PipelineConfig,
    devices: Option<MediaDevices>,
    phase: PipelinePhase,
    buffer: Arc<FrameBuffer>,
    cancel: CancellationToken,
    gate: Arc<DetectGate>,
    capture_status: Arc<WorkerStatus>,
    detection_status: Arc<WorkerStatus>,
    capture_handle: Option<JoinHandle<()>>,
    detection_handle: Option<JoinHandle<()>>,
    stream: Option<StreamSession>,
    results_tx: Option<SyncSender<DetectionResult>>,
    results_rx: Receiver<DetectionResult>,
    last_report: Option<ShutdownReport>,
}

impl PipelineController {
    pub fn new(config: PipelineConfig, devices: MediaDevices) -> Result<Self, PipelineError> {
        if config.shutdown_timeout.is_zero() || config.idle_poll_interval.is_zero() {
            return Err(PipelineError::Config(
                "shutdown timeout and idle poll interval must be non-zero".into(),
            ));
        }
        if config.detection.result_capacity == 0 {
            return Err(PipelineError::Config(
                "detection result_capacity must be non-zero".into(),
            ));
        }
        let buffer = FrameBuffer::new(config.buffer.capacity, config.buffer.policy)?;
        let (results_tx, results_rx) = mpsc::sync_channel(config.detection.result_capacity);
        Ok(Self {
            gate: Arc::new(DetectGate::new(config.detection.start_enabled)),
            config,
            devices: Some(devices),
            phase: PipelinePhase::Idle,
            buffer: Arc::new(buffer),
            cancel: CancellationToken::new(),
            capture_status: Arc::new(WorkerStatus::new(WorkerRole::Capture)),
            detection_status: Arc::new(WorkerStatus::new(WorkerRole::Detection)),
            capture_handle: None,
            detection_handle: None,
            stream: None,
            results_tx: Some(results_tx),
            results_rx,
            last_report: None,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current lifecycle phase. A running pipeline whose worker stopped on a fatal
    /// failure reports `Degraded` until `stop()` is called.
    pub fn phase(&self) -> PipelinePhase {
        if self.phase == PipelinePhase::Running
            && (self.capture_status.is_fatal() || self.detection_status.is_fatal())
        {
            return PipelinePhase::Degraded;
        }
        self.phase
    }

    /// Bring up stream, camera, audio and detector in that order, then spawn both workers.
    pub fn start(&mut self) -> Result<(), PipelineError> {
        match self.phase {
            PipelinePhase::Idle => {}
            PipelinePhase::Running | PipelinePhase::Degraded => {
                return Err(PipelineError::AlreadyStarted)
            }
            PipelinePhase::Stopped | PipelinePhase::Failed => {
                return Err(PipelineError::RestartUnsupported)
            }
        }
        let devices = self
            .devices
            .take()
            .ok_or(PipelineError::RestartUnsupported)?;

        log::info!(
            "pipeline starting (buffer capacity={}, policy={:?})",
            self.buffer.capacity(),
            self.buffer.policy()
        );
        match self.start_with(devices) {
            Ok(()) => {
                self.phase = PipelinePhase::Running;
                log::info!("pipeline running");
                Ok(())
            }
            Err(err) => {
                log::error!("pipeline start failed: {}", err);
                self.abort_start();
                self.phase = PipelinePhase::Failed;
                Err(err)
            }
        }
    }

    fn start_with(&mut self, devices: MediaDevices) -> Result<(), PipelineError> {
        let MediaDevices {
            camera,
            audio,
            stream,
            detector,
        } = devices;
        let poll = self.config.idle_poll_interval;

        let session =
            StreamSession::open(stream).map_err(|err| PipelineError::init(InitStep::Stream, err))?;
        self.stream = Some(session);

        let mut capture = CaptureWorker::new(
            camera,
            audio,
            self.buffer.clone(),
            self.cancel.clone(),
            self.capture_status.clone(),
            poll,
        );
        capture.initialize()?;

        let results_tx = self
            .results_tx
            .take()
            .ok_or(PipelineError::RestartUnsupported)?;
        let mut detection = DetectionWorker::new(
            detector,
            self.buffer.clone(),
            self.gate.clone(),
            self.cancel.clone(),
            self.detection_status.clone(),
            results_tx,
            poll,
            self.config.detection.max_frame_age,
        );
        detection.initialize()?;

        self.capture_handle = Some(
            capture
                .spawn()
                .map_err(|err| PipelineError::init(InitStep::SpawnThread, err))?,
        );
        self.detection_handle = Some(
            detection
                .spawn()
                .map_err(|err| PipelineError::init(InitStep::SpawnThread, err))?,
        );
        Ok(())
    }

    /// Undo a partial start: no worker may be left running and the stream is released.
    fn abort_start(&mut self) {
        self.signal_shutdown();
        let deadline = Instant::now() + self.config.shutdown_timeout;
        for (handle, status) in [
            (&mut self.capture_handle, &self.capture_status),
            (&mut self.detection_handle, &self.detection_status),
        ] {
            if let WorkerExit::TimedOut = join_bounded(handle, status, deadline) {
                log::error!("{} worker did not exit after failed start", status.role());
            }
        }
        self.capture_status.advance(WorkerState::Stopped);
        self.detection_status.advance(WorkerState::Stopped);
        self.buffer.drain();
        self.close_stream();
    }

    fn signal_shutdown(&self) {
        self.capture_status.advance(WorkerState::Stopping);
        self.detection_status.advance(WorkerState::Stopping);
        self.cancel.cancel();
        self.gate.wake();
        self.buffer.close();
    }

    fn close_stream(&mut self) {
        if let Some(mut session) = self.stream.take() {
            if let Err(err) = session.close() {
                log::warn!("stream close failed: {}", err);
            }
        }
    }

    /// Cancel both workers, join them within `shutdown_timeout`, release buffer and stream.
    ///
    /// Workers still running at the deadline are detached and reported as
    /// `ShutdownTimeout`. Calling `stop()` again returns the first report.
    pub fn stop(&mut self) -> Result<ShutdownReport, PipelineError> {
        match self.phase {
            PipelinePhase::Running | PipelinePhase::Degraded => {}
            PipelinePhase::Idle => {
                self.phase = PipelinePhase::Stopped;
                self.devices = None;
                self.capture_status.advance(WorkerState::Stopped);
                self.detection_status.advance(WorkerState::Stopped);
                let report = ShutdownReport::not_started();
                self.last_report = Some(report.clone());
                return Ok(report);
            }
            PipelinePhase::Stopped | PipelinePhase::Failed => {
                return Ok(self
                    .last_report
                    .clone()
                    .unwrap_or_else(ShutdownReport::not_started));
            }
        }

        log::info!("pipeline stopping");
        let started = Instant::now();
        self.signal_shutdown();

        let deadline = started + self.config.shutdown_timeout;
        let capture = join_bounded(&mut self.capture_handle, &self.capture_status, deadline);
        let detection = join_bounded(
            &mut self.detection_handle,
            &self.detection_status,
            deadline,
        );

        let drained_frames = self.buffer.drain().len();
        self.close_stream();
        self.phase = PipelinePhase::Stopped;

        let report = ShutdownReport {
            capture,
            detection,
            buffer: self.buffer.stats(),
            drained_frames,
            elapsed: started.elapsed(),
        };
        self.last_report = Some(report.clone());

        let timed_out: Vec<WorkerRole> = [
            (WorkerRole::Capture, &report.capture),
            (WorkerRole::Detection, &report.detection),
        ]
        .into_iter()
        .filter(|(_, exit)| **exit == WorkerExit::TimedOut)
        .map(|(role, _)| role)
        .collect();

        if !timed_out.is_empty() {
            let err = PipelineError::ShutdownTimeout { workers: timed_out };
            log::error!("pipeline forced abort: {}", err);
            return Err(err);
        }
        log::info!(
            "pipeline stopped in {:?} (dropped={}, drained={})",
            report.elapsed,
            report.buffer.dropped,
            report.drained_frames
        );
        Ok(report)
    }

    /// Surface a worker failure that ended its loop while the pipeline runs.
    ///
    /// The other worker keeps running after a fault is reported; the caller is expected
    /// to call `stop()` to release it.
    pub fn check(&self) -> Result<(), PipelineError> {
        if self.capture_status.is_fatal() {
            return Err(PipelineError::FatalCaptureFailure {
                reason: self.capture_status.last_failure().unwrap_or_default(),
            });
        }
        if self.detection_status.is_fatal() {
            return Err(PipelineError::ThreadPanicked(WorkerRole::Detection));
        }
        Ok(())
    }

    /// Results in increasing sequence order. Disconnects once the detection worker exits.
    pub fn results(&self) -> &Receiver<DetectionResult> {
        &self.results_rx
    }

    /// Enable or pause detection. While paused, frames accumulate under the buffer policy.
    pub fn set_detection_enabled(&self, enabled: bool) {
        log::info!("detection {}", if enabled { "enabled" } else { "paused" });
        self.gate.set_enabled(enabled);
    }

    pub fn capture_state(&self) -> WorkerState {
        self.capture_status.state()
    }

    pub fn detection_state(&self) -> WorkerState {
        self.detection_status.state()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.buffer.dropped_frames()
    }

    /// Results discarded because nobody drained `results()` in time.
    pub fn discarded_results(&self) -> u64 {
        self.detection_status.discarded()
    }

    /// True while any worker thread is alive, including one detached by a timed-out stop.
    pub fn has_running_workers(&self) -> bool {
        [&self.capture_handle, &self.detection_handle]
            .into_iter()
            .any(|handle| handle.as_ref().is_some_and(|h| !h.is_finished()))
    }

    pub fn diagnostics(&self) -> PipelineDiagnostics {
        PipelineDiagnostics {
            phase: self.phase(),
            capture: self.capture_status.snapshot(),
            detection: self.detection_status.snapshot(),
            buffer: self.buffer.stats(),
            detection_enabled: self.gate.is_enabled(),
            stream_open: self.stream.as_ref().is_some_and(StreamSession::is_open),
        }
    }
}

impl Drop for PipelineController {
    fn drop(&mut self) {
        if self.phase == PipelinePhase::Running {
            if let Err(err) = self.stop() {
                log::error!("pipeline stop on drop failed: {}", err);
            }
        }
    }
}

/// Join the worker unless `deadline` passes first. A worker that misses the deadline
/// is left running and its handle stays in `slot`.
fn join_bounded(
    slot: &mut Option<JoinHandle<()>>,
    status: &WorkerStatus,
    deadline: Instant,
) -> WorkerExit {
    loop {
        let finished = match slot.as_ref() {
            None => return WorkerExit::NotStarted,
            Some(handle) => handle.is_finished(),
        };
        if finished {
            return match slot.take().map(JoinHandle::join) {
                None => WorkerExit::NotStarted,
                Some(Ok(())) if status.is_fatal() => {
                    WorkerExit::Failed(status.last_failure().unwrap_or_default())
                }
                Some(Ok(())) => WorkerExit::Clean,
                Some(Err(_)) => {
                    log::error!("{} worker thread panicked", status.role());
                    WorkerExit::Panicked
                }
            };
        }
        if Instant::now() >= deadline {
            log::error!(
                "{} worker did not stop before the shutdown deadline; left running",
                status.role()
            );
            return WorkerExit::TimedOut;
        }
        std::thread::sleep(JOIN_POLL);
    }
}
