use std::io;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::state::StopOnExit;
use super::{CancellationToken, DetectGate, WorkerState, WorkerStatus};
use crate::detect::{run_protocol, DetectionResult, DetectionStatus, DetectorBackend};
use crate::error::{InitStep, PipelineError};
use crate::frame::FrameBuffer;

/// Consumer side of the pipeline: pops frames and runs the detection protocol.
///
/// Frames are processed one at a time on this thread, so results leave in the order frames
/// were popped, which is increasing sequence order.
///
/// The result queue is bounded. When the caller falls behind, the newest result is
/// discarded and counted; what is already queued stays in order.
pub struct DetectionWorker {
    backend: Box<dyn DetectorBackend>,
    buffer: Arc<FrameBuffer>,
    gate: Arc<DetectGate>,
    cancel: CancellationToken,
    status: Arc<WorkerStatus>,
    results: SyncSender<DetectionResult>,
    poll: Duration,
    max_frame_age: Option<Duration>,
    last_seq: u64,
}

impl DetectionWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Box<dyn DetectorBackend>,
        buffer: Arc<FrameBuffer>,
        gate: Arc<DetectGate>,
        cancel: CancellationToken,
        status: Arc<WorkerStatus>,
        results: SyncSender<DetectionResult>,
        poll: Duration,
        max_frame_age: Option<Duration>,
    ) -> Self {
        Self {
            backend,
            buffer,
            gate,
            cancel,
            status,
            results,
            poll,
            max_frame_age,
            last_seq: 0,
        }
    }

    /// Detector initialization (model load, accelerator bring-up).
    pub fn initialize(&mut self) -> Result<(), PipelineError> {
        log::info!("detection: warming up backend {}", self.backend.name());
        self.backend.warm_up().map_err(|err| {
            self.status.record_failure(format!("detector init: {}", err));
            PipelineError::init(InitStep::Detector, err)
        })
    }

    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        let status = self.status.clone();
        let handle = thread::Builder::new()
            .name("robot-media-detect".to_string())
            .spawn(move || self.run())?;
        status.advance(WorkerState::Running);
        Ok(handle)
    }

    fn run(mut self) {
        let _stopped = StopOnExit(self.status.clone());
        self.status.advance(WorkerState::Running);
        log::info!("detection: loop started ({})", self.backend.name());

        while !self.cancel.is_cancelled() {
            if !self.gate.wait_enabled(&self.cancel, self.poll) {
                break;
            }
            let Some(frame) = self.buffer.pop_timeout(self.poll) else {
                if self.buffer.is_closed() {
                    break;
                }
                continue;
            };

            let result = match self.max_frame_age {
                Some(max_age) if frame.age() > max_age => {
                    log::debug!("detection: frame {} stale, skipped", frame.seq());
                    DetectionResult::skipped(frame.seq())
                }
                _ => run_protocol(self.backend.as_mut(), &frame),
            };
            drop(frame);

            debug_assert!(result.seq > self.last_seq, "results out of order");
            self.last_seq = result.seq;
            if let DetectionStatus::Failed(reason) = &result.status {
                self.status.record_failure(reason.clone());
            }
            self.status.mark_processed();
            match self.results.try_send(result) {
                Ok(()) => {}
                Err(TrySendError::Full(result)) => {
                    self.status.mark_discarded();
                    log::debug!("detection: result queue full, frame {} discarded", result.seq);
                }
                Err(TrySendError::Disconnected(_)) => {
                    log::debug!("detection: result receiver dropped");
                }
            }
        }

        log::info!(
            "detection: loop exited (results={}, discarded={}, last_seq={})",
            self.status.processed(),
            self.status.discarded(),
            self.last_seq
        );
    }
}
