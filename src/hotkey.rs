//! Global trigger hotkey - system-wide function-key detection
//!
//! Listens for the configured function key regardless of which process
//! holds input focus, via an rdev hook on a background thread. The
//! listener never mutates playback state itself; it only invokes the
//! registered callback, which posts a trigger into the engine.

use clap::ValueEnum;
use rdev::{Event, EventType, listen};
use std::fmt;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// How long `register` waits for the hook thread to report a startup
/// failure before assuming the hook took.
const HOOK_STARTUP_GRACE: Duration = Duration::from_millis(250);

/// The ten designated trigger keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HotkeyId {
    F1,
    F2,
    F3,
    F4,
    F5,
    F6,
    F7,
    F8,
    F9,
    F10,
}

impl HotkeyId {
    fn to_rdev(self) -> rdev::Key {
        match self {
            HotkeyId::F1 => rdev::Key::F1,
            HotkeyId::F2 => rdev::Key::F2,
            HotkeyId::F3 => rdev::Key::F3,
            HotkeyId::F4 => rdev::Key::F4,
            HotkeyId::F5 => rdev::Key::F5,
            HotkeyId::F6 => rdev::Key::F6,
            HotkeyId::F7 => rdev::Key::F7,
            HotkeyId::F8 => rdev::Key::F8,
            HotkeyId::F9 => rdev::Key::F9,
            HotkeyId::F10 => rdev::Key::F10,
        }
    }
}

impl fmt::Display for HotkeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotkeyId::F1 => write!(f, "F1"),
            HotkeyId::F2 => write!(f, "F2"),
            HotkeyId::F3 => write!(f, "F3"),
            HotkeyId::F4 => write!(f, "F4"),
            HotkeyId::F5 => write!(f, "F5"),
            HotkeyId::F6 => write!(f, "F6"),
            HotkeyId::F7 => write!(f, "F7"),
            HotkeyId::F8 => write!(f, "F8"),
            HotkeyId::F9 => write!(f, "F9"),
            HotkeyId::F10 => write!(f, "F10"),
        }
    }
}

/// Error type for hotkey registration.
#[derive(Debug)]
pub enum HotkeyError {
    /// The OS denied the global hook (insufficient privilege or
    /// unsupported platform).
    Unavailable(String),
}

impl fmt::Display for HotkeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HotkeyError::Unavailable(msg) => write!(f, "global hotkey unavailable: {}", msg),
        }
    }
}

impl std::error::Error for HotkeyError {}

/// Callback fired on every press of the registered hotkey.
pub type TriggerFn = Arc<dyn Fn() + Send + Sync>;

/// Source of trigger events; the seam that lets tests drive the engine
/// without an OS hook.
pub trait TriggerSource: Send {
    /// Register `hotkey` system-wide. Re-registering with a new identity
    /// atomically replaces the previous one: no window where both are
    /// active, none where neither is.
    fn register(&mut self, hotkey: HotkeyId, on_trigger: TriggerFn) -> Result<(), HotkeyError>;

    fn unregister(&mut self);
}

struct Binding {
    key: rdev::Key,
    on_trigger: TriggerFn,
}

/// rdev-backed global hotkey listener.
///
/// One hook thread is started lazily on first register and stays parked
/// for the process lifetime (rdev's listen cannot be torn down); the
/// active binding lives behind a mutex the hook callback reads, so
/// swapping it is atomic.
pub struct GlobalHotkeys {
    binding: Arc<Mutex<Option<Binding>>>,
    listener_started: bool,
}

impl GlobalHotkeys {
    pub fn new() -> Self {
        Self {
            binding: Arc::new(Mutex::new(None)),
            listener_started: false,
        }
    }

    fn start_listener(&mut self) -> Result<(), HotkeyError> {
        let binding = Arc::clone(&self.binding);
        let (err_tx, err_rx) = mpsc::channel::<String>();

        thread::spawn(move || {
            let callback = move |event: Event| {
                if let EventType::KeyPress(key) = event.event_type {
                    // Copy the callback out so it runs without the
                    // binding lock held.
                    let hit = {
                        let guard = binding.lock().unwrap();
                        guard
                            .as_ref()
                            .filter(|b| b.key == key)
                            .map(|b| Arc::clone(&b.on_trigger))
                    };
                    if let Some(on_trigger) = hit {
                        on_trigger();
                    }
                }
            };
            // Blocks for the process lifetime on success.
            if let Err(e) = listen(callback) {
                let msg = format!("{:?}", e);
                eprintln!("[HOTKEY] listener error: {}", msg);
                let _ = err_tx.send(msg);
            }
        });

        // listen() only returns on failure, so a quiet grace period means
        // the hook took.
        match err_rx.recv_timeout(HOOK_STARTUP_GRACE) {
            Ok(msg) => Err(HotkeyError::Unavailable(msg)),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                self.listener_started = true;
                Ok(())
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(HotkeyError::Unavailable("listener thread exited".into()))
            }
        }
    }
}

impl Default for GlobalHotkeys {
    fn default() -> Self {
        Self::new()
    }
}

impl TriggerSource for GlobalHotkeys {
    fn register(&mut self, hotkey: HotkeyId, on_trigger: TriggerFn) -> Result<(), HotkeyError> {
        if !self.listener_started {
            self.start_listener()?;
        }
        *self.binding.lock().unwrap() = Some(Binding {
            key: hotkey.to_rdev(),
            on_trigger,
        });
        Ok(())
    }

    fn unregister(&mut self) {
        *self.binding.lock().unwrap() = None;
    }
}
