use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::state::StopOnExit;
use super::{CancellationToken, WorkerState, WorkerStatus};
use crate::audio::AudioDevice;
use crate::error::{InitStep, PipelineError};
use crate::frame::{Frame, FrameBuffer, PushOutcome};
use crate::ingest::{CameraSource, CaptureError};

/// Producer side of the pipeline: owns the camera and audio devices and feeds the buffer.
///
/// Sequence numbers advance only for successful reads, so a transient failure leaves no
/// gap in the sequence.
pub struct CaptureWorker {
    camera: Box<dyn CameraSource>,
    audio: Box<dyn AudioDevice>,
    buffer: Arc<FrameBuffer>,
    cancel: CancellationToken,
    status: Arc<WorkerStatus>,
    poll: Duration,
    next_seq: u64,
    transient_failures: u64,
}

impl CaptureWorker {
    pub fn new(
        camera: Box<dyn CameraSource>,
        audio: Box<dyn AudioDevice>,
        buffer: Arc<FrameBuffer>,
        cancel: CancellationToken,
        status: Arc<WorkerStatus>,
        poll: Duration,
    ) -> Self {
        Self {
            camera,
            audio,
            buffer,
            cancel,
            status,
            poll,
            next_seq: 0,
            transient_failures: 0,
        }
    }

    /// Startup sequence: camera hardware, then audio. The first failure aborts.
    pub fn initialize(&mut self) -> Result<(), PipelineError> {
        log::info!("capture: initializing camera {}", self.camera.name());
        self.camera.init().map_err(|err| {
            self.status.record_failure(format!("camera init: {}", err));
            PipelineError::init(InitStep::CameraHardware, err)
        })?;

        log::info!("capture: initializing audio {}", self.audio.name());
        self.audio.init().map_err(|err| {
            self.status.record_failure(format!("audio init: {}", err));
            PipelineError::init(InitStep::Audio, err)
        })?;
        Ok(())
    }

    /// Start the capture loop on its own thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        let status = self.status.clone();
        let handle = thread::Builder::new()
            .name("robot-media-capture".to_string())
            .spawn(move || self.run())?;
        status.advance(WorkerState::Running);
        Ok(handle)
    }

    fn run(mut self) {
        let _stopped = StopOnExit(self.status.clone());
        self.status.advance(WorkerState::Running);
        log::info!("capture: loop started");

        while !self.cancel.is_cancelled() {
            match self.camera.read_frame() {
                Ok(capture) => {
                    self.next_seq += 1;
                    let frame =
                        Frame::new(self.next_seq, capture.data, capture.width, capture.height);
                    self.status.mark_processed();
                    match self.buffer.push_blocking(frame, &self.cancel, self.poll) {
                        PushOutcome::Stored => {}
                        PushOutcome::StoredEvicting { evicted_seq } => {
                            log::debug!("capture: buffer full, dropped frame {}", evicted_seq);
                        }
                        PushOutcome::Rejected => {
                            log::debug!("capture: frame {} not buffered", self.next_seq);
                        }
                    }
                }
                Err(CaptureError::Transient(reason)) => {
                    self.transient_failures += 1;
                    log::warn!("capture: transient read failure: {}", reason);
                    self.status.record_failure(
                        PipelineError::TransientCaptureFailure { reason }.to_string(),
                    );
                    if self.cancel.wait_timeout(self.poll) {
                        break;
                    }
                }
                Err(CaptureError::Fatal(reason)) => {
                    log::error!("capture: camera {} failed: {}", self.camera.name(), reason);
                    self.status
                        .record_fatal(PipelineError::FatalCaptureFailure { reason }.to_string());
                    break;
                }
                Err(CaptureError::EndOfStream) => {
                    log::info!(
                        "capture: {} exhausted after {} frames",
                        self.camera.name(),
                        self.next_seq
                    );
                    break;
                }
            }
        }

        log::info!(
            "capture: loop exited (frames={}, transient_failures={}, dropped={})",
            self.next_seq,
            self.transient_failures,
            self.buffer.dropped_frames()
        );
    }
}
