//! Keystroke emitter - turns step text into paced synthetic key events
//!
//! Writes to the OS input queue via enigo one character at a time, waiting
//! a jittered delay before each keystroke. The whole emission is
//! cancellable with sub-delay latency: every wait is sliced into short
//! increments that re-check the cancel token.
//!
//! The emitter has no knowledge of which application is focused and gets
//! no feedback from the target surface; an already-typed prefix stays put
//! when an emission is cancelled.

use crate::speed::{self, SpeedPreset};
use enigo::{Direction, Enigo, Key, Keyboard, Settings};
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Settle delay before the trailing Enter, so the target surface has the
/// full text before the message is sent.
const ENTER_SETTLE: Duration = Duration::from_millis(80);

/// Cancellation checks happen at least this often during any wait.
const CANCEL_POLL: Duration = Duration::from_millis(5);

/// One synthetic key event handed to a [`KeySink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    /// A printable character, including ones needing shift or unicode
    /// composition (the sink handles the composition).
    Char(char),
    Return,
    Tab,
}

/// Error type for synthetic input operations.
#[derive(Debug)]
pub enum InputError {
    Init(String),
    Send(String),
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::Init(msg) => write!(f, "input init error: {}", msg),
            InputError::Send(msg) => write!(f, "input send error: {}", msg),
        }
    }
}

impl std::error::Error for InputError {}

/// Destination for synthetic key events.
///
/// The seam between the emission loop and the OS; tests substitute a
/// recording sink here.
pub trait KeySink {
    fn send(&mut self, event: KeyEvent) -> Result<(), InputError>;
}

/// Production sink writing to the OS input queue via enigo.
pub struct EnigoSink {
    enigo: Enigo,
}

impl EnigoSink {
    pub fn new() -> Result<Self, InputError> {
        let enigo = Enigo::new(&Settings::default())
            .map_err(|e| InputError::Init(format!("failed to initialize enigo: {}", e)))?;
        Ok(Self { enigo })
    }
}

impl KeySink for EnigoSink {
    fn send(&mut self, event: KeyEvent) -> Result<(), InputError> {
        let key = match event {
            KeyEvent::Char(c) => Key::Unicode(c),
            KeyEvent::Return => Key::Return,
            KeyEvent::Tab => Key::Tab,
        };
        self.enigo
            .key(key, Direction::Click)
            .map_err(|e| InputError::Send(format!("failed to send key: {}", e)))
    }
}

/// Shared cancellation flag checked throughout an emission.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal outcome of one emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitResult {
    Completed,
    Cancelled,
}

/// Non-fatal problem recorded while emitting; the step keeps going.
#[derive(Debug, Clone, PartialEq)]
pub enum EmitWarning {
    /// The character cannot be synthesized and was skipped.
    UnsupportedCharacter { index: usize, ch: char },
    /// The sink rejected the event; the character was skipped.
    SendFailed { index: usize, reason: String },
}

impl fmt::Display for EmitWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmitWarning::UnsupportedCharacter { index, ch } => {
                write!(f, "unsupported character {:?} at index {}", ch, index)
            }
            EmitWarning::SendFailed { index, reason } => {
                write!(f, "send failed at index {}: {}", index, reason)
            }
        }
    }
}

/// What one emission produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub result: EmitResult,
    pub warnings: Vec<EmitWarning>,
}

impl Emission {
    fn cancelled(warnings: Vec<EmitWarning>) -> Self {
        Self {
            result: EmitResult::Cancelled,
            warnings,
        }
    }
}

/// Map a character to the key event that reproduces it, or None if it
/// cannot be synthesized.
fn key_event_for(ch: char) -> Option<KeyEvent> {
    match ch {
        '\n' => Some(KeyEvent::Return),
        '\t' => Some(KeyEvent::Tab),
        c if c.is_control() => None,
        c => Some(KeyEvent::Char(c)),
    }
}

/// Wait for `duration`, re-checking the token in short slices.
///
/// Returns true if the wait was cut short by cancellation.
fn wait_cancellable(duration: Duration, token: &CancelToken) -> bool {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if token.is_cancelled() {
            return true;
        }
        let slice = remaining.min(CANCEL_POLL);
        std::thread::sleep(slice);
        remaining = remaining.saturating_sub(slice);
    }
    token.is_cancelled()
}

/// Emit `text` into the sink one character at a time.
///
/// Waits `pre_delay` first, then a sampled delay before each character.
/// If `press_enter` is set and the text completed uncancelled, a single
/// Return follows after a settle delay.
pub fn emit<S: KeySink, R: Rng>(
    sink: &mut S,
    text: &str,
    preset: SpeedPreset,
    press_enter: bool,
    pre_delay: Duration,
    token: &CancelToken,
    rng: &mut R,
) -> Emission {
    let mut warnings = Vec::new();

    if wait_cancellable(pre_delay, token) {
        return Emission::cancelled(warnings);
    }

    let mut prev: Option<char> = None;
    for (index, ch) in text.chars().enumerate() {
        if token.is_cancelled() {
            return Emission::cancelled(warnings);
        }
        if wait_cancellable(speed::char_delay(preset, prev, rng), token) {
            return Emission::cancelled(warnings);
        }

        match key_event_for(ch) {
            Some(event) => {
                if let Err(e) = sink.send(event) {
                    warnings.push(EmitWarning::SendFailed {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
            None => {
                warnings.push(EmitWarning::UnsupportedCharacter { index, ch });
            }
        }
        prev = Some(ch);
    }

    if press_enter {
        if wait_cancellable(ENTER_SETTLE, token) {
            return Emission::cancelled(warnings);
        }
        if let Err(e) = sink.send(KeyEvent::Return) {
            warnings.push(EmitWarning::SendFailed {
                index: text.chars().count(),
                reason: e.to_string(),
            });
        }
    }

    Emission {
        result: EmitResult::Completed,
        warnings,
    }
}
