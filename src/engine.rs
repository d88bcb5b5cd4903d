// src/engine.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};

use crate::config::PipelineConfig;
use crate::drivers::buffer::{FrameConsumer, FrameProducer, WindowAssembler};
use crate::drivers::error::RppgError;
use crate::drivers::extractor::WaveformExtractor;
use crate::drivers::pipeline::{Analysis, VitalsPipeline};
use crate::drivers::source::{CaptureSpec, FrameSource};
use crate::model::RppgResult;
use crate::store::ResultStore;
use crate::types::{FrameWindow, SessionEvent, SessionId, SessionState};

/// How often the worker wakes up to look for cancellation while no frame arrives.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

pub type Outcome = Result<Arc<RppgResult>, RppgError>;

struct Slot {
    generation: u64,
    state: SessionState,
}

/// State shared between the controller and its threads. The state value is only
/// ever replaced whole, under the lock, and every replacement is published.
pub(crate) struct Shared {
    slot: Mutex<Slot>,
    subscribers: Mutex<Vec<Sender<SessionEvent>>>,
    last_analysis: Mutex<Option<Arc<Analysis>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                generation: 0,
                state: SessionState::Idle,
            }),
            subscribers: Mutex::new(Vec::new()),
            last_analysis: Mutex::new(None),
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        lock(&self.slot).state.clone()
    }

    pub(crate) fn generation(&self) -> u64 {
        lock(&self.slot).generation
    }

    pub(crate) fn subscribe(&self) -> Receiver<SessionEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        lock(&self.subscribers).push(tx);
        rx
    }

    /// Replaces the state unconditionally. With `bump`, a new generation starts and
    /// any thread still working for the old one is ignored from now on.
    pub(crate) fn replace(&self, state: SessionState, bump: bool) -> u64 {
        let mut slot = lock(&self.slot);
        if bump {
            slot.generation += 1;
        }
        debug!("session state {} -> {}", slot.state.name(), state.name());
        slot.state = state.clone();
        self.publish(SessionEvent::State(state));
        slot.generation
    }

    /// Replaces the state only if `generation` is still current.
    pub(crate) fn replace_if(&self, generation: u64, state: SessionState) -> bool {
        let mut slot = lock(&self.slot);
        if slot.generation != generation {
            return false;
        }
        if slot.state.name() != state.name() {
            debug!("session state {} -> {}", slot.state.name(), state.name());
        }
        slot.state = state.clone();
        self.publish(SessionEvent::State(state));
        true
    }

    /// Moves the active session of `generation` to idle under a new generation.
    /// Checked under the same lock the worker publishes through, so a session
    /// that has already finished keeps its terminal state.
    pub(crate) fn abandon(&self, generation: u64) -> Result<u64, RppgError> {
        let mut slot = lock(&self.slot);
        if slot.generation != generation || !slot.state.is_active() {
            return Err(RppgError::InvalidTransition {
                state: slot.state.name(),
                action: "cancel",
            });
        }
        slot.generation += 1;
        debug!("session state {} -> idle", slot.state.name());
        slot.state = SessionState::Idle;
        self.publish(SessionEvent::State(SessionState::Idle));
        Ok(slot.generation)
    }

    pub(crate) fn warn(&self, warning: RppgError) {
        warn!("{warning}");
        self.publish(SessionEvent::Warning(warning));
    }

    fn publish(&self, event: SessionEvent) {
        lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn last_analysis(&self) -> Option<Arc<Analysis>> {
        lock(&self.last_analysis).clone()
    }
}

/// Runs the source on its own thread, pushing into the drop-oldest queue until the
/// source ends, fails, or `stop` is raised. The source is handed back on join.
pub fn spawn_capture(
    mut source: Box<dyn FrameSource>,
    spec: CaptureSpec,
    producer: FrameProducer,
    stop: Arc<AtomicBool>,
    errors: Sender<RppgError>,
) -> JoinHandle<Box<dyn FrameSource>> {
    thread::spawn(move || {
        if let Err(e) = source.start(&spec) {
            error!("frame source failed to start: {e}");
            errors.try_send(e).ok();
            return source;
        }
        let mut produced = 0u64;
        while !stop.load(Ordering::SeqCst) {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    produced += 1;
                    producer.push(frame);
                }
                Ok(None) => break,
                Err(e) => {
                    error!("frame source error: {e}");
                    errors.try_send(e).ok();
                    break;
                }
            }
        }
        debug!(
            "capture finished after {produced} frames ({} dropped)",
            producer.dropped()
        );
        source
    })
}

/// Everything the worker needs for one session.
pub(crate) struct WorkerJob {
    pub config: PipelineConfig,
    pub session_id: SessionId,
    pub generation: u64,
    pub extractor: Arc<dyn WaveformExtractor>,
    pub consumer: FrameConsumer,
    pub capture_errors: Receiver<RppgError>,
    pub stop_capture: Arc<AtomicBool>,
    pub store: Option<Arc<dyn ResultStore>>,
    pub outcome: Sender<Outcome>,
    pub deadline: Instant,
}

/// Consumes frames into a window, then runs the processing pipeline. The outcome is
/// sent once on the job's channel; a cancelled session sends nothing.
pub(crate) fn spawn_worker(shared: Arc<Shared>, job: WorkerJob) -> JoinHandle<()> {
    thread::spawn(move || {
        let generation = job.generation;
        let processed = match collect(&shared, &job) {
            Collected::Cancelled => {
                debug!("session {} abandoned while recording", job.session_id);
                return;
            }
            Collected::Failed(e) => Err(e),
            Collected::Window(window) => process(&job, &window),
        };
        job.stop_capture.store(true, Ordering::SeqCst);
        let (state, outcome, analysis) = match processed {
            Ok(analysis) => {
                let result = Arc::new(analysis.result.clone());
                (
                    SessionState::Completed(Arc::clone(&result)),
                    Ok(result),
                    Some(analysis),
                )
            }
            Err(e) => {
                error!("session {} failed: {e}", job.session_id);
                (SessionState::Failed(e.clone()), Err(e), None)
            }
        };
        if !shared.replace_if(generation, state) {
            debug!("session {} abandoned while processing", job.session_id);
            return;
        }
        if let Some(analysis) = analysis {
            for skipped in &analysis.skipped {
                shared.warn(skipped.clone());
            }
            *lock(&shared.last_analysis) = Some(Arc::new(analysis));
        }
        job.outcome.send(outcome.clone()).ok();
        if let (Ok(result), Some(store)) = (&outcome, &job.store) {
            persist(&shared, store.as_ref(), result);
        }
    })
}

fn process(job: &WorkerJob, window: &FrameWindow) -> Result<Analysis, RppgError> {
    let pipeline = VitalsPipeline::new(&job.config);
    let analysis = pipeline.analyze(job.extractor.as_ref(), window, job.session_id.clone())?;
    if Instant::now() > job.deadline {
        return Err(RppgError::Timeout {
            elapsed_ms: elapsed_ms(job),
        });
    }
    Ok(analysis)
}

enum Collected {
    Window(FrameWindow),
    Failed(RppgError),
    Cancelled,
}

fn elapsed_ms(job: &WorkerJob) -> u64 {
    let limit = job.config.session_timeout();
    let started = job.deadline.checked_sub(limit).unwrap_or(job.deadline);
    started.elapsed().as_millis() as u64
}

fn collect(shared: &Shared, job: &WorkerJob) -> Collected {
    let capture = &job.config.capture;
    let expected = capture.expected_frames();
    let mut assembler = WindowAssembler::new(expected, capture.target_fps);
    while !assembler.is_full() {
        if shared.generation() != job.generation {
            return Collected::Cancelled;
        }
        let now = Instant::now();
        if now >= job.deadline {
            return Collected::Failed(RppgError::Timeout {
                elapsed_ms: elapsed_ms(job),
            });
        }
        match job.consumer.recv_deadline((now + POLL_INTERVAL).min(job.deadline)) {
            Ok(frame) => {
                if assembler.push(frame) {
                    let state = SessionState::Recording {
                        progress: assembler.progress(),
                        elapsed_secs: assembler.elapsed_secs(),
                    };
                    if !shared.replace_if(job.generation, state) {
                        return Collected::Cancelled;
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                if let Ok(e) = job.capture_errors.try_recv() {
                    return Collected::Failed(e);
                }
                info!(
                    "source ended after {} of {expected} frames",
                    assembler.len()
                );
                break;
            }
        }
        let dropped = job.consumer.dropped();
        if dropped > capture.max_dropped_frames {
            warn!("{dropped} frames dropped, giving up");
            return Collected::Failed(RppgError::InsufficientFrames {
                expected,
                received: assembler.len(),
                dropped,
            });
        }
    }
    job.stop_capture.store(true, Ordering::SeqCst);
    // a short window is rejected from processing, not from recording
    if !shared.replace_if(job.generation, SessionState::Processing) {
        return Collected::Cancelled;
    }
    match assembler.finish(job.consumer.dropped()) {
        Ok(window) => Collected::Window(window),
        Err(e) => Collected::Failed(e),
    }
}

/// Saves then uploads a completed result after its outcome went out. Failures are
/// published as warnings; the session stays completed.
fn persist(shared: &Shared, store: &dyn ResultStore, result: &RppgResult) {
    if let Err(e) = store.save(result) {
        shared.warn(e);
    }
    if let Err(e) = store.upload(result) {
        shared.warn(e);
    }
}

pub(crate) fn outcome_channel() -> (Sender<Outcome>, Receiver<Outcome>) {
    bounded(1)
}
