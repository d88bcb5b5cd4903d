// src/session.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver};
use log::{debug, error, info};

use crate::config::PipelineConfig;
use crate::drivers::alignment::{self, AlignmentReport};
use crate::drivers::buffer::frame_queue;
use crate::drivers::error::RppgError;
use crate::drivers::extractor::WaveformExtractor;
use crate::drivers::pipeline::Analysis;
use crate::drivers::source::{CaptureSpec, FrameSource};
use crate::engine::{outcome_channel, spawn_capture, spawn_worker, Outcome, Shared, WorkerJob};
use crate::store::ResultStore;
use crate::types::{Frame, SessionEvent, SessionId, SessionState};

/// Receives the single outcome of one recording. `None` means the session was
/// cancelled before it produced one.
#[derive(Debug)]
pub struct SessionHandle {
    session_id: SessionId,
    rx: Receiver<Outcome>,
}

impl SessionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn wait(&self) -> Option<Outcome> {
        self.rx.recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_outcome(&self) -> Option<Outcome> {
        self.rx.try_recv().ok()
    }
}

/// Result of checking a preview frame while aligning.
#[derive(Debug)]
pub enum Alignment {
    Recording(SessionHandle),
    Rejected(AlignmentReport),
}

struct ActiveSession {
    stop: Arc<AtomicBool>,
    capture: Option<JoinHandle<Box<dyn FrameSource>>>,
    worker: Option<JoinHandle<()>>,
}

/// Drives one measurement at a time through
/// idle → aligning → recording → processing → completed | failed.
pub struct SessionController {
    config: PipelineConfig,
    extractor: Arc<dyn WaveformExtractor>,
    store: Option<Arc<dyn ResultStore>>,
    shared: Arc<Shared>,
    source: Option<Box<dyn FrameSource>>,
    active: Option<ActiveSession>,
    session_id: Option<SessionId>,
    generation: u64,
}

impl SessionController {
    pub fn new(
        config: PipelineConfig,
        source: Box<dyn FrameSource>,
        extractor: Arc<dyn WaveformExtractor>,
        store: Option<Arc<dyn ResultStore>>,
    ) -> Self {
        Self {
            config,
            extractor,
            store,
            shared: Arc::new(Shared::new()),
            source: Some(source),
            active: None,
            session_id: None,
            generation: 0,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Every later transition and warning, in order.
    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        self.shared.subscribe()
    }

    /// Signals of the most recent completed session, for recording and plotting.
    pub fn last_analysis(&self) -> Option<Arc<Analysis>> {
        self.shared.last_analysis()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    /// Starts a new session in the aligning state. A finished session is
    /// dismissed first; an active one makes this fail with `SessionBusy`.
    pub fn request_session(&mut self) -> Result<SessionId, RppgError> {
        let state = self.shared.state();
        if state.is_active() {
            return Err(RppgError::SessionBusy);
        }
        if state.is_terminal() {
            self.dismiss()?;
        }
        if self.source.is_none() {
            return Err(RppgError::InvalidTransition {
                state: state.name(),
                action: "start without a frame source",
            });
        }
        let session_id = SessionId::random();
        self.generation = self.shared.replace(SessionState::Aligning, true);
        info!("session {session_id} requested");
        self.session_id = Some(session_id.clone());
        Ok(session_id)
    }

    /// Accepts the alignment as is and starts recording.
    pub fn confirm_alignment(&mut self) -> Result<SessionHandle, RppgError> {
        self.expect_state("confirm alignment", |s| matches!(s, SessionState::Aligning))?;
        self.begin_recording()
    }

    /// Starts recording only if `preview` passes the alignment check. A rejected
    /// frame leaves the session aligning.
    pub fn align_with(&mut self, preview: &Frame) -> Result<Alignment, RppgError> {
        self.expect_state("align", |s| matches!(s, SessionState::Aligning))?;
        let report = alignment::assess(preview, self.config.extractor.roi_fraction);
        if !report.aligned {
            debug!(
                "alignment rejected: brightness {:.0}, skin {:.2}, score {:.2}",
                report.brightness, report.skin_coverage, report.score
            );
            return Ok(Alignment::Rejected(report));
        }
        self.begin_recording().map(Alignment::Recording)
    }

    /// Ends recording early. The frames collected so far go to processing, which
    /// rejects a short window.
    pub fn stop(&mut self) -> Result<(), RppgError> {
        self.expect_state("stop", |s| matches!(s, SessionState::Recording { .. }))?;
        if let Some(active) = &self.active {
            info!("recording stopped by caller");
            active.stop.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Abandons the session and returns to idle. The frame source is stopped and
    /// released before this returns; any in-flight result is discarded.
    pub fn cancel(&mut self) -> Result<(), RppgError> {
        self.generation = self.shared.abandon(self.generation)?;
        if let Some(id) = &self.session_id {
            info!("session {id} cancelled");
        }
        self.release(false);
        Ok(())
    }

    /// Acknowledges a completed or failed session.
    pub fn dismiss(&mut self) -> Result<(), RppgError> {
        let state = self.shared.state();
        match state {
            SessionState::Idle => Ok(()),
            ref s if s.is_terminal() => {
                self.release(true);
                self.shared.replace(SessionState::Idle, false);
                Ok(())
            }
            s => Err(RppgError::InvalidTransition {
                state: s.name(),
                action: "dismiss",
            }),
        }
    }

    fn expect_state(
        &self,
        action: &'static str,
        allowed: impl Fn(&SessionState) -> bool,
    ) -> Result<(), RppgError> {
        let state = self.shared.state();
        if allowed(&state) {
            Ok(())
        } else {
            Err(RppgError::InvalidTransition {
                state: state.name(),
                action,
            })
        }
    }

    fn begin_recording(&mut self) -> Result<SessionHandle, RppgError> {
        let session_id = self.session_id.clone().unwrap_or_else(SessionId::random);
        let Some(source) = self.source.take() else {
            return Err(RppgError::InvalidTransition {
                state: "aligning",
                action: "record without a frame source",
            });
        };
        let spec = CaptureSpec::from(&self.config.capture);
        let (producer, consumer) = frame_queue(self.config.capture.queue_capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let (error_tx, error_rx) = bounded(1);
        let (outcome_tx, outcome_rx) = outcome_channel();
        self.shared.replace_if(
            self.generation,
            SessionState::Recording {
                progress: 0.0,
                elapsed_secs: 0.0,
            },
        );
        info!(
            "session {session_id} recording {} frames at {} fps",
            spec.expected_frames(),
            spec.target_fps
        );
        let capture = spawn_capture(source, spec, producer, Arc::clone(&stop), error_tx);
        let worker = spawn_worker(
            Arc::clone(&self.shared),
            WorkerJob {
                config: self.config.clone(),
                session_id: session_id.clone(),
                generation: self.generation,
                extractor: Arc::clone(&self.extractor),
                consumer,
                capture_errors: error_rx,
                stop_capture: Arc::clone(&stop),
                store: self.store.clone(),
                outcome: outcome_tx,
                deadline: Instant::now() + self.config.session_timeout(),
            },
        );
        self.active = Some(ActiveSession {
            stop,
            capture: Some(capture),
            worker: Some(worker),
        });
        Ok(SessionHandle {
            session_id,
            rx: outcome_rx,
        })
    }

    /// Stops capture, takes the source back and releases it. The worker is only
    /// joined once it has finished on its own.
    fn release(&mut self, join_worker: bool) {
        if let Some(mut active) = self.active.take() {
            active.stop.store(true, Ordering::SeqCst);
            if let Some(handle) = active.capture.take() {
                match handle.join() {
                    Ok(source) => self.source = Some(source),
                    Err(_) => error!("capture thread panicked, frame source lost"),
                }
            }
            if join_worker {
                if let Some(handle) = active.worker.take() {
                    if handle.join().is_err() {
                        error!("processing worker panicked");
                    }
                }
            }
        }
        if let Some(source) = self.source.as_mut() {
            source.cancel();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.shared.state().is_active() {
            self.cancel().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::error::ErrorKind;
    use crate::drivers::extractor::PosExtractor;
    use crate::drivers::source::{SyntheticFaceSource, SyntheticPulse};
    use crate::model::QualityLevel;
    use crate::store::MemoryStore;
    use ndarray::Array3;
    use std::sync::atomic::AtomicUsize;

    /// Flat frames at a fixed pace, counting cancellations.
    struct PacedSource {
        interval: Duration,
        next: u64,
        cancels: Arc<AtomicUsize>,
    }

    impl PacedSource {
        fn new(interval: Duration) -> (Self, Arc<AtomicUsize>) {
            let cancels = Arc::new(AtomicUsize::new(0));
            let source = Self {
                interval,
                next: 0,
                cancels: Arc::clone(&cancels),
            };
            (source, cancels)
        }
    }

    impl FrameSource for PacedSource {
        fn start(&mut self, _spec: &CaptureSpec) -> Result<(), RppgError> {
            self.next = 0;
            Ok(())
        }
        fn next_frame(&mut self) -> Result<Option<Frame>, RppgError> {
            std::thread::sleep(self.interval);
            let index = self.next;
            self.next += 1;
            let pixels = Array3::from_elem((16, 16, 3), 120u8);
            Ok(Some(Frame::new(index, self.interval * index as u32, pixels)))
        }
        fn cancel(&mut self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.capture.frame_width = 16;
        config.capture.frame_height = 16;
        config.capture.queue_capacity = 1024;
        config
    }

    fn controller(config: PipelineConfig, source: Box<dyn FrameSource>) -> SessionController {
        let extractor = Arc::new(PosExtractor::new(&config.extractor, (16, 16)));
        SessionController::new(config, source, extractor, None)
    }

    fn wait_for_recording(events: &Receiver<SessionEvent>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match events.recv_deadline(deadline) {
                Ok(SessionEvent::State(SessionState::Recording { progress, .. })) if progress > 0.0 => {
                    return
                }
                Ok(_) => continue,
                Err(e) => panic!("never started recording: {e}"),
            }
        }
    }

    #[test]
    fn second_request_while_recording_is_busy() {
        let (source, _) = PacedSource::new(Duration::from_millis(5));
        let mut controller = controller(small_config(), Box::new(source));
        controller.request_session().unwrap();
        assert_eq!(controller.request_session().unwrap_err(), RppgError::SessionBusy);
        let events = controller.subscribe();
        let _handle = controller.confirm_alignment().unwrap();
        wait_for_recording(&events);
        assert_eq!(controller.request_session().unwrap_err(), RppgError::SessionBusy);
        controller.cancel().unwrap();
    }

    #[test]
    fn cancel_while_recording_releases_source_once() {
        let (source, cancels) = PacedSource::new(Duration::from_millis(5));
        let mut controller = controller(small_config(), Box::new(source));
        controller.request_session().unwrap();
        let events = controller.subscribe();
        let handle = controller.confirm_alignment().unwrap();
        wait_for_recording(&events);
        controller.cancel().unwrap();
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
        assert!(handle.wait_timeout(Duration::from_secs(2)).is_none());
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn actions_in_the_wrong_state_are_rejected() {
        let (source, cancels) = PacedSource::new(Duration::from_millis(5));
        let mut controller = controller(small_config(), Box::new(source));
        let err = controller.confirm_alignment().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(controller.stop().unwrap_err().kind(), ErrorKind::InvalidTransition);
        assert_eq!(controller.cancel().unwrap_err().kind(), ErrorKind::InvalidTransition);
        controller.request_session().unwrap();
        assert_eq!(controller.stop().unwrap_err().kind(), ErrorKind::InvalidTransition);
        controller.cancel().unwrap();
        assert_eq!(controller.state(), SessionState::Idle);
        assert_eq!(cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dark_preview_keeps_aligning() {
        let (source, _) = PacedSource::new(Duration::from_millis(5));
        let mut controller = controller(small_config(), Box::new(source));
        controller.request_session().unwrap();
        let dark = Frame::new(0, Duration::ZERO, Array3::from_elem((16, 16, 3), 10u8));
        match controller.align_with(&dark).unwrap() {
            Alignment::Rejected(report) => assert!(!report.aligned),
            Alignment::Recording(_) => panic!("dark frame accepted"),
        }
        assert_eq!(controller.state(), SessionState::Aligning);
    }

    #[test]
    fn stopping_early_fails_with_insufficient_frames() {
        let (source, _) = PacedSource::new(Duration::from_millis(5));
        let mut controller = controller(small_config(), Box::new(source));
        let all = controller.subscribe();
        controller.request_session().unwrap();
        let events = controller.subscribe();
        let handle = controller.confirm_alignment().unwrap();
        wait_for_recording(&events);
        controller.stop().unwrap();
        let outcome = handle.wait_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.unwrap_err().kind(), ErrorKind::InsufficientFrames);
        assert!(matches!(controller.state(), SessionState::Failed(_)));

        let mut states: Vec<&str> = Vec::new();
        for event in all.try_iter() {
            if let SessionEvent::State(state) = event {
                if states.last() != Some(&state.name()) {
                    states.push(state.name());
                }
            }
        }
        assert_eq!(states, ["aligning", "recording", "processing", "failed"]);
        controller.dismiss().unwrap();
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[test]
    fn slow_source_times_out() {
        let mut config = small_config();
        config.capture.duration_secs = 0.5;
        config.processing_budget_secs = 0.2;
        let (source, _) = PacedSource::new(Duration::from_millis(100));
        let mut controller = controller(config, Box::new(source));
        controller.request_session().unwrap();
        let handle = controller.confirm_alignment().unwrap();
        let outcome = handle.wait_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.unwrap_err().kind(), ErrorKind::Timeout);
    }

    #[test]
    fn synthetic_session_completes_end_to_end() {
        let config = small_config();
        let source = SyntheticFaceSource::new(SyntheticPulse::default(), 5);
        let store = Arc::new(MemoryStore::new());
        let extractor = Arc::new(PosExtractor::new(&config.extractor, (16, 16)));
        let mut controller = SessionController::new(
            config,
            Box::new(source),
            extractor,
            Some(store.clone() as Arc<dyn ResultStore>),
        );
        let session_id = controller.request_session().unwrap();
        let preview = Frame::new(
            0,
            Duration::ZERO,
            Array3::from_shape_fn((16, 16, 3), |(_, _, c)| [170u8, 120, 95][c]),
        );
        let handle = match controller.align_with(&preview).unwrap() {
            Alignment::Recording(handle) => handle,
            Alignment::Rejected(report) => panic!("rejected: {report:?}"),
        };
        let result = handle.wait_timeout(Duration::from_secs(30)).unwrap().unwrap();
        assert_eq!(result.session_id, session_id);
        assert!((73.0..=77.0).contains(&result.heart_rate), "{}", result.heart_rate);
        assert_eq!(result.frame_count, 600);
        assert!(matches!(result.quality.level, QualityLevel::Good | QualityLevel::Excellent));
        assert_eq!(controller.state(), SessionState::Completed(Arc::clone(&result)));
        assert_eq!(controller.last_analysis().unwrap().conditioned.len(), 600);

        // a finished session cannot be cancelled back to idle
        let err = controller.cancel().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
        assert_eq!(controller.state(), SessionState::Completed(Arc::clone(&result)));

        let deadline = Instant::now() + Duration::from_secs(5);
        while store.uploaded().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(store.find(&session_id).unwrap().as_ref(), Some(result.as_ref()));
        assert_eq!(store.uploaded(), vec![session_id]);

        // a new request dismisses the finished session
        controller.request_session().unwrap();
        assert_eq!(controller.state(), SessionState::Aligning);
        controller.cancel().unwrap();
    }

    #[test]
    fn store_failures_are_warnings() {
        let config = small_config();
        let source = SyntheticFaceSource::new(SyntheticPulse::default(), 8);
        let extractor = Arc::new(PosExtractor::new(&config.extractor, (16, 16)));
        let store: Arc<dyn ResultStore> = Arc::new(MemoryStore::offline());
        let mut controller = SessionController::new(config, Box::new(source), extractor, Some(store));
        let events = controller.subscribe();
        controller.request_session().unwrap();
        let handle = controller.confirm_alignment().unwrap();
        assert!(handle.wait_timeout(Duration::from_secs(30)).unwrap().is_ok());
        let deadline = Instant::now() + Duration::from_secs(5);
        let warning = loop {
            match events.recv_deadline(deadline) {
                Ok(SessionEvent::Warning(w)) if w.kind() == ErrorKind::NetworkFailure => break w,
                Ok(_) => continue,
                Err(e) => panic!("no network warning: {e}"),
            }
        };
        assert!(matches!(warning, RppgError::NetworkFailure(_)));
        assert!(matches!(controller.state(), SessionState::Completed(_)));
    }
}
