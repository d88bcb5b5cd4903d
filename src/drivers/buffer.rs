use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, trace};
use crate::drivers::error::RppgError;
use crate::types::{Frame, FrameWindow};
/// Bounded frame queue between the capture thread and the worker. When full, the
/// producer evicts the oldest queued frame and counts it as dropped.
pub fn frame_queue(capacity: usize) -> (FrameProducer, FrameConsumer) {
    let (tx, rx) = bounded(capacity.max(1));
    let dropped = Arc::new(AtomicUsize::new(0));
    (
        FrameProducer {
            tx,
            evict: rx.clone(),
            dropped: Arc::clone(&dropped),
        },
        FrameConsumer { rx, dropped },
    )
}
pub struct FrameProducer {
    tx: Sender<Frame>,
    evict: Receiver<Frame>,
    dropped: Arc<AtomicUsize>,
}
impl FrameProducer {
    /// Never blocks.
    pub fn push(&self, mut frame: Frame) {
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if let Ok(old) = self.evict.try_recv() {
                        let total = self.dropped.fetch_add(1, Ordering::SeqCst) + 1;
                        trace!("queue full, dropped frame {} ({total} total)", old.index);
                    }
                    frame = back;
                }
                // The producer holds a receiver itself, so the channel cannot disconnect.
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}
pub struct FrameConsumer {
    rx: Receiver<Frame>,
    dropped: Arc<AtomicUsize>,
}
impl FrameConsumer {
    /// Waits for the next frame until `deadline`. `Disconnected` means the producer
    /// is gone and the queue is drained.
    pub fn recv_deadline(&self, deadline: Instant) -> Result<Frame, RecvTimeoutError> {
        self.rx.recv_deadline(deadline)
    }
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }
}
/// Collects accepted frames until the window is full.
pub struct WindowAssembler {
    expected: usize,
    sample_rate_hz: f32,
    frames: Vec<Frame>,
    last_timestamp: Option<Duration>,
    rejected: usize,
}
impl WindowAssembler {
    pub fn new(expected: usize, sample_rate_hz: f32) -> Self {
        Self {
            expected,
            sample_rate_hz,
            frames: Vec::with_capacity(expected),
            last_timestamp: None,
            rejected: 0,
        }
    }
    /// Accepts the frame if its timestamp moves forward. Returns whether it was kept.
    pub fn push(&mut self, frame: Frame) -> bool {
        if self.is_full() {
            return false;
        }
        if let Some(last) = self.last_timestamp {
            if frame.timestamp <= last {
                self.rejected += 1;
                debug!(
                    "frame {} out of order ({:?} <= {:?})",
                    frame.index, frame.timestamp, last
                );
                return false;
            }
        }
        self.last_timestamp = Some(frame.timestamp);
        self.frames.push(frame);
        true
    }
    pub fn len(&self) -> usize {
        self.frames.len()
    }
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
    pub fn is_full(&self) -> bool {
        self.frames.len() >= self.expected
    }
    pub fn rejected(&self) -> usize {
        self.rejected
    }
    pub fn progress(&self) -> f32 {
        if self.expected == 0 {
            return 1.0;
        }
        (self.frames.len() as f32 / self.expected as f32).min(1.0)
    }
    pub fn elapsed_secs(&self) -> f32 {
        self.frames.len() as f32 / self.sample_rate_hz.max(f32::EPSILON)
    }
    pub fn finish(self, dropped: usize) -> Result<FrameWindow, RppgError> {
        FrameWindow::assemble(self.frames, self.expected, self.sample_rate_hz, dropped + self.rejected)
    }
}
