//! demotype - scripted-typing playback engine
//!
//! Drives a presentation aid that impersonates live human typing into
//! whatever application has focus. A pre-authored script of chat messages
//! advances one step per press of a global hotkey; each step's text is
//! emitted as paced synthetic keystrokes with human-looking jitter, and
//! the whole thing is promptly cancellable mid-emission.
//!
//! # Components
//!
//! - [`script`]: the immutable-per-run Script/Step model
//! - [`speed`]: named speed presets and delay sampling
//! - [`emitter`]: cancellable synthetic keystroke emission
//! - [`hotkey`]: system-wide trigger key listening
//! - [`engine`]: the playback state machine coordinating it all

pub mod emitter;
pub mod engine;
pub mod hotkey;
pub mod script;
pub mod speed;

pub use emitter::{CancelToken, EmitResult, EnigoSink, InputError, KeyEvent, KeySink};
pub use engine::{
    PlaybackEngine, PlaybackState, StartError, StartReport, StartWarning, Status, StatusObserver,
};
pub use hotkey::{GlobalHotkeys, HotkeyError, HotkeyId, TriggerFn, TriggerSource};
pub use script::{Role, Script, Step};
pub use speed::SpeedPreset;
