//! Captured frames and the bounded hand-off buffer.
//!
//! - `Frame`: immutable capture (payload, sequence number, timestamps). Payload bytes are
//!   private and zeroized when the frame is released.
//! - `FrameBuffer`: fixed-capacity ring shared by the capture and detection workers. It is the
//!   only state both worker threads mutate; all synchronization lives inside it.

use serde::{Deserialize, Serialize};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use zeroize::Zeroize;

use crate::error::PipelineError;
use crate::pipeline::CancellationToken;

/// Upper bound on configurable buffer capacity.
pub const MAX_BUFFER_CAPACITY: usize = 1024;

/// Default buffer capacity. Live capture favours a short queue.
pub const DEFAULT_BUFFER_CAPACITY: usize = 8;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// One captured frame.
///
/// Fields are private and there is no mutable accessor: a frame never changes after the
/// capture worker produces it. No `Clone` either, so exactly one owner holds it at a time
/// (capture worker, then buffer slot, then detection worker).
pub struct Frame {
    seq: u64,
    data: Vec<u8>,
    width: u32,
    height: u32,
    captured_at: SystemTime,
    capture_instant: Instant,
}

impl Frame {
    /// Wrap a raw capture. Called only by the capture worker, which owns sequencing.
    pub fn new(seq: u64, data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            seq,
            data,
            width,
            height,
            captured_at: SystemTime::now(),
            capture_instant: Instant::now(),
        }
    }

    /// Monotonically increasing sequence number assigned at capture.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Read-only payload for the detection stages.
    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Wall-clock capture time.
    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Time since capture, from the monotonic clock.
    pub fn age(&self) -> Duration {
        self.capture_instant.elapsed()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Payload is never logged.
        f.debug_struct("Frame")
            .field("seq", &self.seq)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.data.zeroize();
    }
}

// ----------------------------------------------------------------------------
// FrameBuffer
// ----------------------------------------------------------------------------

/// Behaviour when the producer pushes into a full buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressurePolicy {
    /// Producer never blocks; the stalest unconsumed frame is evicted.
    #[default]
    DropOldest,
    /// Producer waits for a free slot (non-real-time use only).
    BlockProducer,
}

impl std::str::FromStr for BackpressurePolicy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "drop_oldest" => Ok(BackpressurePolicy::DropOldest),
            "block_producer" | "block" => Ok(BackpressurePolicy::BlockProducer),
            other => Err(PipelineError::Config(format!(
                "unknown backpressure policy '{}'",
                other
            ))),
        }
    }
}

/// Result of handing a frame to the buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored in a free slot.
    Stored,
    /// Stored after evicting the oldest filled slot (`DropOldest`).
    StoredEvicting { evicted_seq: u64 },
    /// Not stored; the pushed frame was dropped.
    Rejected,
}

impl PushOutcome {
    pub fn is_stored(self) -> bool {
        !matches!(self, PushOutcome::Rejected)
    }
}

/// Point-in-time buffer counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BufferStats {
    pub capacity: usize,
    pub occupied: usize,
    /// Frames stored into a slot.
    pub pushed: u64,
    /// Frames handed to a consumer.
    pub popped: u64,
    /// Frames lost to backpressure (evicted or rejected).
    pub dropped: u64,
}

struct Ring {
    slots: Vec<Option<Frame>>,
    write_pos: u64,
    read_pos: u64,
    pushed: u64,
    popped: u64,
    dropped: u64,
    closed: bool,
}

impl Ring {
    fn occupied(&self) -> usize {
        (self.write_pos - self.read_pos) as usize
    }

    fn is_full(&self) -> bool {
        self.occupied() == self.slots.len()
    }

    fn store(&mut self, frame: Frame) {
        let idx = (self.write_pos % self.slots.len() as u64) as usize;
        debug_assert!(self.slots[idx].is_none(), "write into filled slot");
        self.slots[idx] = Some(frame);
        self.write_pos += 1;
        self.pushed += 1;
    }

    fn take_oldest(&mut self) -> Option<Frame> {
        if self.occupied() == 0 {
            return None;
        }
        let idx = (self.read_pos % self.slots.len() as u64) as usize;
        let frame = self.slots[idx].take();
        self.read_pos += 1;
        frame
    }
}

/// Bounded ring buffer between the capture worker and the detection worker.
///
/// Frames leave the buffer by move: a popped frame is owned by its consumer and its slot is
/// already empty, so no slot can be overwritten while its frame is being processed and no
/// frame can be delivered twice.
pub struct FrameBuffer {
    ring: Mutex<Ring>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: BackpressurePolicy,
}

impl FrameBuffer {
    pub fn new(capacity: usize, policy: BackpressurePolicy) -> Result<Self, PipelineError> {
        if capacity == 0 || capacity > MAX_BUFFER_CAPACITY {
            return Err(PipelineError::Config(format!(
                "buffer capacity must be in 1..={}, got {}",
                MAX_BUFFER_CAPACITY, capacity
            )));
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            ring: Mutex::new(Ring {
                slots,
                write_pos: 0,
                read_pos: 0,
                pushed: 0,
                popped: 0,
                dropped: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            policy,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Ring> {
        // Ring state is updated before any call that could panic, so a poisoned lock still
        // guards a consistent ring.
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn policy(&self) -> BackpressurePolicy {
        self.policy
    }

    /// Push without blocking, applying the configured policy when full.
    pub fn push(&self, frame: Frame) -> PushOutcome {
        let mut ring = self.lock();
        if ring.closed {
            ring.dropped += 1;
            return PushOutcome::Rejected;
        }
        let outcome = if !ring.is_full() {
            ring.store(frame);
            PushOutcome::Stored
        } else {
            match self.policy {
                BackpressurePolicy::DropOldest => {
                    let evicted = ring.take_oldest();
                    ring.dropped += 1;
                    ring.store(frame);
                    PushOutcome::StoredEvicting {
                        evicted_seq: evicted.map(|f| f.seq()).unwrap_or_default(),
                    }
                }
                BackpressurePolicy::BlockProducer => {
                    ring.dropped += 1;
                    PushOutcome::Rejected
                }
            }
        };
        drop(ring);
        if outcome.is_stored() {
            self.not_empty.notify_one();
        }
        outcome
    }

    /// Returns `false` when the frame was dropped instead of stored.
    pub fn try_push(&self, frame: Frame) -> bool {
        self.push(frame).is_stored()
    }

    /// Push, waiting for a free slot under `BlockProducer`.
    ///
    /// Waits in `poll` slices so cancellation is observed with bounded latency. Returns
    /// `Rejected` if the buffer is closed or `cancel` fires before space frees up. Under
    /// `DropOldest` this is the same as `push`.
    pub fn push_blocking(
        &self,
        frame: Frame,
        cancel: &CancellationToken,
        poll: Duration,
    ) -> PushOutcome {
        if self.policy == BackpressurePolicy::DropOldest {
            return self.push(frame);
        }
        let mut ring = self.lock();
        loop {
            if ring.closed || cancel.is_cancelled() {
                ring.dropped += 1;
                return PushOutcome::Rejected;
            }
            if !ring.is_full() {
                ring.store(frame);
                drop(ring);
                self.not_empty.notify_one();
                return PushOutcome::Stored;
            }
            ring = self
                .not_full
                .wait_timeout(ring, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Oldest frame, or `None` when empty (the normal idle state).
    pub fn try_pop(&self) -> Option<Frame> {
        let mut ring = self.lock();
        let frame = ring.take_oldest();
        if frame.is_some() {
            ring.popped += 1;
            drop(ring);
            self.not_full.notify_one();
        }
        frame
    }

    /// Oldest frame, waiting up to `timeout` for one to arrive.
    ///
    /// Returns early with `None` when the buffer is closed.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Frame> {
        let deadline = Instant::now() + timeout;
        let mut ring = self.lock();
        loop {
            if let Some(frame) = ring.take_oldest() {
                ring.popped += 1;
                drop(ring);
                self.not_full.notify_one();
                return Some(frame);
            }
            let now = Instant::now();
            if ring.closed || now >= deadline {
                return None;
            }
            ring = self
                .not_empty
                .wait_timeout(ring, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Reject further pushes and wake every waiter.
    pub fn close(&self) {
        self.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Remove every buffered frame (shutdown release). Not counted as popped.
    pub fn drain(&self) -> Vec<Frame> {
        let mut ring = self.lock();
        let mut frames = Vec::with_capacity(ring.occupied());
        while let Some(frame) = ring.take_oldest() {
            frames.push(frame);
        }
        drop(ring);
        self.not_full.notify_all();
        frames
    }

    pub fn len(&self) -> usize {
        self.lock().occupied()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_frames(&self) -> u64 {
        self.lock().dropped
    }

    pub fn stats(&self) -> BufferStats {
        let ring = self.lock();
        BufferStats {
            capacity: self.capacity,
            occupied: ring.occupied(),
            pushed: ring.pushed,
            popped: ring.popped,
            dropped: ring.dropped,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn make_frame(seq: u64) -> Frame {
        Frame::new(seq, format!("frame{}", seq).into_bytes(), 4, 4)
    }

    #[test]
    fn rejects_invalid_capacity() {
        assert!(FrameBuffer::new(0, BackpressurePolicy::DropOldest).is_err());
        assert!(FrameBuffer::new(MAX_BUFFER_CAPACITY + 1, BackpressurePolicy::DropOldest).is_err());
        assert!(FrameBuffer::new(1, BackpressurePolicy::DropOldest).is_ok());
    }

    #[test]
    fn occupancy_stays_within_capacity() {
        let mut rng = StdRng::seed_from_u64(7);
        for policy in [BackpressurePolicy::DropOldest, BackpressurePolicy::BlockProducer] {
            let buf = FrameBuffer::new(5, policy).unwrap();
            let mut seq = 0;
            for _ in 0..2_000 {
                if rng.gen_bool(0.6) {
                    seq += 1;
                    buf.push(make_frame(seq));
                } else {
                    buf.try_pop();
                }
                let len = buf.len();
                assert!(len <= buf.capacity(), "occupancy {} over capacity", len);
            }
            let stats = buf.stats();
            assert_eq!(
                stats.pushed,
                stats.popped + stats.occupied as u64 + evicted(&stats, policy)
            );
        }
    }

    // Under DropOldest every drop is an eviction of a stored frame; under BlockProducer
    // drops are rejected pushes that were never stored.
    fn evicted(stats: &BufferStats, policy: BackpressurePolicy) -> u64 {
        match policy {
            BackpressurePolicy::DropOldest => stats.dropped,
            BackpressurePolicy::BlockProducer => 0,
        }
    }

    #[test]
    fn pops_in_push_order() {
        let buf = FrameBuffer::new(4, BackpressurePolicy::DropOldest).unwrap();
        buf.push(make_frame(1));
        buf.push(make_frame(2));
        assert_eq!(buf.try_pop().unwrap().seq(), 1);
        buf.push(make_frame(3));
        buf.push(make_frame(4));
        buf.push(make_frame(5));
        let order: Vec<u64> = std::iter::from_fn(|| buf.try_pop()).map(|f| f.seq()).collect();
        assert_eq!(order, vec![2, 3, 4, 5]);
    }

    #[test]
    fn drop_oldest_evicts_exactly_one() {
        let buf = FrameBuffer::new(3, BackpressurePolicy::DropOldest).unwrap();
        for seq in 1..=3 {
            assert_eq!(buf.push(make_frame(seq)), PushOutcome::Stored);
        }
        assert_eq!(buf.dropped_frames(), 0);

        let outcome = buf.push(make_frame(4));
        assert_eq!(outcome, PushOutcome::StoredEvicting { evicted_seq: 1 });
        assert_eq!(buf.dropped_frames(), 1);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.try_pop().unwrap().seq(), 2);
    }

    #[test]
    fn block_producer_rejects_when_full() {
        let buf = FrameBuffer::new(2, BackpressurePolicy::BlockProducer).unwrap();
        assert!(buf.try_push(make_frame(1)));
        assert!(buf.try_push(make_frame(2)));
        assert!(!buf.try_push(make_frame(3)));
        assert_eq!(buf.dropped_frames(), 1);
        assert_eq!(buf.try_pop().unwrap().seq(), 1);
    }

    #[test]
    fn empty_pop_is_idle_not_error() {
        let buf = FrameBuffer::new(2, BackpressurePolicy::DropOldest).unwrap();
        assert!(buf.try_pop().is_none());
        assert!(buf.pop_timeout(Duration::from_millis(10)).is_none());
        assert_eq!(buf.stats().popped, 0);
    }

    #[test]
    fn concurrent_consumers_never_share_a_frame() {
        let buf = Arc::new(FrameBuffer::new(8, BackpressurePolicy::BlockProducer).unwrap());
        let cancel = CancellationToken::new();
        let total = 500u64;

        let producer = {
            let buf = buf.clone();
            let cancel = cancel.clone();
            thread::spawn(move || {
                for seq in 1..=total {
                    let outcome =
                        buf.push_blocking(make_frame(seq), &cancel, Duration::from_millis(5));
                    assert_eq!(outcome, PushOutcome::Stored);
                }
            })
        };

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let buf = buf.clone();
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    while let Some(frame) = buf.pop_timeout(Duration::from_millis(200)) {
                        seen.push(frame.seq());
                    }
                    seen
                })
            })
            .collect();

        producer.join().unwrap();
        let mut all = HashSet::new();
        let mut count = 0;
        for consumer in consumers {
            for seq in consumer.join().unwrap() {
                count += 1;
                assert!(all.insert(seq), "frame {} delivered twice", seq);
            }
        }
        assert_eq!(count, total as usize);
        assert_eq!(buf.dropped_frames(), 0);
    }

    #[test]
    fn blocked_producer_resumes_after_pop() {
        let buf = Arc::new(FrameBuffer::new(1, BackpressurePolicy::BlockProducer).unwrap());
        let cancel = CancellationToken::new();
        buf.push(make_frame(1));

        let producer = {
            let buf = buf.clone();
            let cancel = cancel.clone();
            thread::spawn(move || buf.push_blocking(make_frame(2), &cancel, Duration::from_millis(5)))
        };

        thread::sleep(Duration::from_millis(30));
        assert_eq!(buf.try_pop().unwrap().seq(), 1);
        assert_eq!(producer.join().unwrap(), PushOutcome::Stored);
        assert_eq!(buf.try_pop().unwrap().seq(), 2);
    }

    #[test]
    fn blocked_producer_observes_cancellation() {
        let buf = Arc::new(FrameBuffer::new(1, BackpressurePolicy::BlockProducer).unwrap());
        let cancel = CancellationToken::new();
        buf.push(make_frame(1));

        let producer = {
            let buf = buf.clone();
            let cancel = cancel.clone();
            thread::spawn(move || buf.push_blocking(make_frame(2), &cancel, Duration::from_millis(5)))
        };

        cancel.cancel();
        assert_eq!(producer.join().unwrap(), PushOutcome::Rejected);
        assert_eq!(buf.dropped_frames(), 1);
    }

    #[test]
    fn close_wakes_waiting_consumer() {
        let buf = Arc::new(FrameBuffer::new(2, BackpressurePolicy::DropOldest).unwrap());
        let consumer = {
            let buf = buf.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let frame = buf.pop_timeout(Duration::from_secs(10));
                (frame.is_none(), start.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(20));
        buf.close();
        let (empty, waited) = consumer.join().unwrap();
        assert!(empty);
        assert!(waited < Duration::from_secs(5));
        assert!(!buf.try_push(make_frame(1)));
    }

    #[test]
    fn drain_releases_remaining_frames() {
        let buf = FrameBuffer::new(4, BackpressurePolicy::DropOldest).unwrap();
        for seq in 1..=3 {
            buf.push(make_frame(seq));
        }
        let drained: Vec<u64> = buf.drain().iter().map(Frame::seq).collect();
        assert_eq!(drained, vec![1, 2, 3]);
        assert!(buf.is_empty());
    }

    #[test]
    fn policy_parses_from_config_strings() {
        assert_eq!(
            "drop-oldest".parse::<BackpressurePolicy>().unwrap(),
            BackpressurePolicy::DropOldest
        );
        assert_eq!(
            "BLOCK_PRODUCER".parse::<BackpressurePolicy>().unwrap(),
            BackpressurePolicy::BlockProducer
        );
        assert!("newest".parse::<BackpressurePolicy>().is_err());
    }
}
