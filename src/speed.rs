//! Speed profiles - jittered per-character typing delays
//!
//! Each preset maps to a base delay per character; the sampled delay is
//! spread around it so the output reads as human typing rather than a
//! metronome. Sampling is a pure function of preset, previous character,
//! and an explicit RNG handle, so tests can seed it and assert bounds.

use clap::ValueEnum;
use rand::Rng;
use std::fmt;
use std::time::Duration;

/// Characters that get a longer follow-up pause, like a human hitting a
/// word or sentence boundary.
const BOUNDARY_CHARS: &str = " .,!?;:\n";

/// Delays never go below this, so the OS event queue is never flooded.
const MIN_DELAY_MS: f64 = 3.0;

/// Named typing speed preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SpeedPreset {
    Slow,
    Normal,
    Fast,
    VeryFast,
}

impl SpeedPreset {
    pub const ALL: [SpeedPreset; 4] = [
        SpeedPreset::Slow,
        SpeedPreset::Normal,
        SpeedPreset::Fast,
        SpeedPreset::VeryFast,
    ];

    /// Base delay per character in milliseconds.
    ///
    /// Strictly decreasing Slow -> VeryFast.
    pub fn base_delay_ms(self) -> f64 {
        match self {
            SpeedPreset::Slow => 65.0,
            SpeedPreset::Normal => 40.0,
            SpeedPreset::Fast => 22.0,
            SpeedPreset::VeryFast => 10.0,
        }
    }

    /// Uniform spread around the base delay (0.40 = +/-40%).
    pub fn jitter_ratio(self) -> f64 {
        0.40
    }
}

impl fmt::Display for SpeedPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeedPreset::Slow => write!(f, "Slow"),
            SpeedPreset::Normal => write!(f, "Normal"),
            SpeedPreset::Fast => write!(f, "Fast"),
            SpeedPreset::VeryFast => write!(f, "Very Fast"),
        }
    }
}

/// Sample the delay to wait before the next character.
///
/// `prev` is the character just emitted, if any; boundary characters add
/// an extra 10-50 ms pause on top of the jittered base.
pub fn char_delay<R: Rng>(preset: SpeedPreset, prev: Option<char>, rng: &mut R) -> Duration {
    let base = preset.base_delay_ms();
    let jitter = preset.jitter_ratio();
    let mut ms = rng.gen_range(base * (1.0 - jitter)..=base * (1.0 + jitter));

    if let Some(c) = prev {
        if BOUNDARY_CHARS.contains(c) {
            ms += rng.gen_range(10.0..=50.0);
        }
    }

    Duration::from_secs_f64(ms.max(MIN_DELAY_MS) / 1000.0)
}
