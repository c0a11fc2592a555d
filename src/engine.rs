//! Playback state machine - the coordinator that owns the step cursor
//!
//! Consumes trigger events, hands step text to the emitter on a worker
//! thread, and publishes status to the observer on every transition.
//! All state lives behind a single mutex; every transition is one locked
//! check-and-set, so a trigger racing a concurrent `stop` can never start
//! a fresh emission after cancellation was requested.

use crate::emitter::{self, CancelToken, EmitResult, Emission, KeySink};
use crate::hotkey::{HotkeyError, HotkeyId, TriggerFn, TriggerSource};
use crate::script::{Script, Step};
use crate::speed::SpeedPreset;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Characters of next-step text shown in status pushes.
pub const PREVIEW_LEN: usize = 60;

/// Lifecycle of a playback session.
///
/// `Completed` and `Stopped` are terminal; a new `start` is required to
/// run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Armed,
    Typing,
    Completed,
    Stopped,
}

impl PlaybackState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PlaybackState::Completed | PlaybackState::Stopped)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Idle => write!(f, "Idle"),
            PlaybackState::Armed => write!(f, "Armed"),
            PlaybackState::Typing => write!(f, "Typing"),
            PlaybackState::Completed => write!(f, "Completed"),
            PlaybackState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Snapshot pushed to the observer after every transition.
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub state: PlaybackState,
    /// Index of the step last handed to the emitter; None before the
    /// first trigger.
    pub step_index: Option<usize>,
    /// Preview of the step the next trigger would type.
    pub next_preview: Option<String>,
    /// Hotkey the session listens on; None when no session exists.
    pub hotkey: Option<HotkeyId>,
    /// Warnings accumulated over the session, oldest first.
    pub warnings: Vec<String>,
}

impl Status {
    fn idle() -> Self {
        Self {
            state: PlaybackState::Idle,
            step_index: None,
            next_preview: None,
            hotkey: None,
            warnings: Vec::new(),
        }
    }
}

/// Non-fatal condition reported by a successful `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartWarning {
    EmptyScript,
}

impl fmt::Display for StartWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartWarning::EmptyScript => write!(f, "script has no steps"),
        }
    }
}

/// What a successful `start` reports back.
#[derive(Debug, Clone, Default)]
pub struct StartReport {
    pub warnings: Vec<StartWarning>,
}

/// Why `start` refused to run.
#[derive(Debug)]
pub enum StartError {
    /// A session is already Armed or Typing; stop it first.
    SessionActive,
    Hotkey(HotkeyError),
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::SessionActive => write!(f, "a playback session is already running"),
            StartError::Hotkey(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for StartError {}

impl From<HotkeyError> for StartError {
    fn from(e: HotkeyError) -> Self {
        StartError::Hotkey(e)
    }
}

/// Called synchronously on every transition, from whichever thread drove
/// it. Must not call back into the engine.
pub type StatusObserver = Box<dyn Fn(&Status) + Send>;

/// Transient per-run state, created on `start` and replaced on the next.
///
/// Each session carries its own cancel token; a token from an earlier
/// session stays cancelled forever, so a worker dispatched for that
/// session can never emit into a later one.
struct PlaybackSession {
    script: Script,
    /// 0-based index of the step last dispatched; None means not begun.
    cursor: Option<usize>,
    preset: SpeedPreset,
    hotkey: HotkeyId,
    cancel: CancelToken,
    warnings: Vec<String>,
}

struct EngineInner {
    state: PlaybackState,
    session: Option<PlaybackSession>,
    /// In-flight emission worker, stored in the same locked section that
    /// spawned it so `stop` always finds it.
    worker: Option<JoinHandle<()>>,
    observer: Option<StatusObserver>,
    last_status: Status,
}

/// The playback engine. Cheap to clone; all clones share one state.
pub struct PlaybackEngine<S: KeySink + Send + 'static> {
    inner: Arc<Mutex<EngineInner>>,
    sink: Arc<Mutex<S>>,
    trigger_source: Arc<Mutex<Box<dyn TriggerSource>>>,
    verbose: bool,
}

impl<S: KeySink + Send + 'static> Clone for PlaybackEngine<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            sink: Arc::clone(&self.sink),
            trigger_source: Arc::clone(&self.trigger_source),
            verbose: self.verbose,
        }
    }
}

impl<S: KeySink + Send + 'static> PlaybackEngine<S> {
    pub fn new(sink: S, trigger_source: Box<dyn TriggerSource>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EngineInner {
                state: PlaybackState::Idle,
                session: None,
                worker: None,
                observer: None,
                last_status: Status::idle(),
            })),
            sink: Arc::new(Mutex::new(sink)),
            trigger_source: Arc::new(Mutex::new(trigger_source)),
            verbose: false,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Install the status observer. Late subscribers can read the
    /// last-known status via [`PlaybackEngine::status`].
    pub fn set_observer(&self, observer: StatusObserver) {
        self.inner.lock().unwrap().observer = Some(observer);
    }

    /// Last status pushed (or the initial Idle status).
    pub fn status(&self) -> Status {
        self.inner.lock().unwrap().last_status.clone()
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.lock().unwrap().state
    }

    /// Begin a new session: register the hotkey, reset the cursor and arm.
    ///
    /// Fails without touching state if a session is already running or the
    /// OS denies the global hook. An empty script still starts; the report
    /// carries [`StartWarning::EmptyScript`] and the first trigger
    /// completes the session.
    pub fn start(
        &self,
        script: Script,
        preset: SpeedPreset,
        hotkey: HotkeyId,
    ) -> Result<StartReport, StartError> {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.state, PlaybackState::Armed | PlaybackState::Typing) {
            return Err(StartError::SessionActive);
        }

        let me = self.clone();
        let on_trigger: TriggerFn = Arc::new(move || me.on_trigger());
        self.trigger_source
            .lock()
            .unwrap()
            .register(hotkey, on_trigger)?;

        let mut report = StartReport::default();
        let mut session_warnings = Vec::new();
        if script.is_empty() {
            report.warnings.push(StartWarning::EmptyScript);
            session_warnings.push(StartWarning::EmptyScript.to_string());
        }

        inner.session = Some(PlaybackSession {
            script,
            cursor: None,
            preset,
            hotkey,
            cancel: CancelToken::new(),
            warnings: session_warnings,
        });
        inner.state = PlaybackState::Armed;
        if self.verbose {
            eprintln!("[ENGINE] armed: {} at {} speed", hotkey, preset);
        }
        Self::notify(&mut inner);
        Ok(report)
    }

    /// Swap the trigger hotkey of the running session.
    ///
    /// No effect unless a session is Armed or Typing; the old identity is
    /// replaced atomically by the registration swap.
    pub fn set_hotkey(&self, hotkey: HotkeyId) -> Result<(), HotkeyError> {
        let mut inner = self.inner.lock().unwrap();
        if !matches!(inner.state, PlaybackState::Armed | PlaybackState::Typing) {
            return Ok(());
        }
        let me = self.clone();
        let on_trigger: TriggerFn = Arc::new(move || me.on_trigger());
        self.trigger_source
            .lock()
            .unwrap()
            .register(hotkey, on_trigger)?;
        if let Some(session) = inner.session.as_mut() {
            session.hotkey = hotkey;
        }
        Self::notify(&mut inner);
        Ok(())
    }

    /// Stop the session: cancel any in-flight emission, transition to
    /// Stopped and unregister the hotkey.
    ///
    /// Safe from any thread, idempotent, and synchronous: it joins the
    /// emission worker, so no further characters are emitted after it
    /// returns and a new `start` may follow immediately.
    pub fn stop(&self) {
        let handle = {
            let mut guard = self.inner.lock().unwrap();
            let inner = &mut *guard;
            if let Some(session) = inner.session.as_ref() {
                session.cancel.cancel();
            }
            if matches!(inner.state, PlaybackState::Armed | PlaybackState::Typing) {
                inner.state = PlaybackState::Stopped;
                if self.verbose {
                    eprintln!("[ENGINE] stopped");
                }
                Self::notify(inner);
            }
            inner.worker.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        self.trigger_source.lock().unwrap().unregister();
    }

    /// Entry point for trigger events from the listener thread.
    fn on_trigger(&self) {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;
        if inner.state != PlaybackState::Armed {
            if self.verbose && inner.state == PlaybackState::Typing {
                eprintln!("[ENGINE] trigger discarded while typing");
            }
            return;
        }
        let Some(session) = inner.session.as_mut() else {
            return;
        };
        if session.cancel.is_cancelled() {
            return;
        }
        let next = session.cursor.map_or(0, |c| c + 1);
        match session.script.step(next).cloned() {
            Some(step) => {
                session.cursor = Some(next);
                let preset = session.preset;
                let token = session.cancel.clone();
                inner.state = PlaybackState::Typing;
                if self.verbose {
                    eprintln!("[ENGINE] typing step {}: {:?}", next, step.preview(40));
                }
                Self::notify(inner);
                // Spawned while still holding the lock, so a concurrent
                // `stop` either blocks this dispatch entirely or sees the
                // handle it must join.
                inner.worker = Some(self.spawn_emission(step, preset, token));
            }
            None => {
                inner.state = PlaybackState::Completed;
                if self.verbose {
                    eprintln!("[ENGINE] completed");
                }
                Self::notify(inner);
            }
        }
    }

    /// Run one emission on its own thread; the engine lock is never held
    /// while keystrokes go out.
    fn spawn_emission(
        &self,
        step: Step,
        preset: SpeedPreset,
        token: CancelToken,
    ) -> JoinHandle<()> {
        let me = self.clone();
        thread::spawn(move || {
            let emission = {
                let mut sink = me.sink.lock().unwrap();
                emitter::emit(
                    &mut *sink,
                    &step.text,
                    preset,
                    step.press_enter,
                    step.pre_delay(),
                    &token,
                    &mut rand::thread_rng(),
                )
            };
            me.finish_step(emission);
        })
    }

    /// Worker-thread callback once an emission ends.
    fn finish_step(&self, emission: Emission) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(session) = inner.session.as_mut() {
            session
                .warnings
                .extend(emission.warnings.iter().map(|w| w.to_string()));
        }
        if inner.state != PlaybackState::Typing {
            // stop() already drove the transition; push again so warnings
            // collected before cancellation still reach the observer.
            if !emission.warnings.is_empty() {
                Self::notify(&mut inner);
            }
            return;
        }
        match emission.result {
            EmitResult::Cancelled => {
                inner.state = PlaybackState::Stopped;
                Self::notify(&mut inner);
            }
            EmitResult::Completed => {
                let at_end = inner.session.as_ref().is_none_or(|s| {
                    s.cursor.is_none_or(|c| c + 1 >= s.script.len())
                });
                inner.state = if at_end {
                    PlaybackState::Completed
                } else {
                    PlaybackState::Armed
                };
                Self::notify(&mut inner);
            }
        }
    }

    fn notify(inner: &mut EngineInner) {
        let status = Self::make_status(inner);
        inner.last_status = status.clone();
        if let Some(observer) = inner.observer.as_ref() {
            observer(&status);
        }
    }

    fn make_status(inner: &EngineInner) -> Status {
        let Some(session) = inner.session.as_ref() else {
            return Status::idle();
        };
        let next_preview = if matches!(inner.state, PlaybackState::Armed | PlaybackState::Typing) {
            let next = session.cursor.map_or(0, |c| c + 1);
            session.script.step(next).map(|s| s.preview(PREVIEW_LEN))
        } else {
            None
        };
        Status {
            state: inner.state,
            step_index: session.cursor,
            next_preview,
            hotkey: Some(session.hotkey),
            warnings: session.warnings.clone(),
        }
    }
}
