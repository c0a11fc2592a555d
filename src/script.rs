//! Script model - the ordered steps of one demo flow
//!
//! A script is authored elsewhere and handed to the playback engine as a
//! value; the engine never mutates it while a session runs.

use serde::Deserialize;
use std::fmt;
use std::time::Duration;

/// Longest pre-type delay a step may carry, in seconds.
pub const MAX_PRE_DELAY_SECS: f32 = 5.0;

/// Who a chat message is attributed to in the authored flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Agent,
    Customer,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Agent => write!(f, "Agent"),
            Role::Customer => write!(f, "Customer"),
            Role::System => write!(f, "System"),
        }
    }
}

/// A single step: one message to be typed out on the next trigger.
#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub role: Role,
    pub text: String,
    /// Press Enter after typing to send the message.
    #[serde(default = "default_press_enter")]
    pub press_enter: bool,
    /// Seconds to wait before the first keystroke, clamped to [0, 5].
    #[serde(default = "default_pre_delay")]
    pub pre_delay_secs: f32,
}

fn default_press_enter() -> bool {
    true
}

fn default_pre_delay() -> f32 {
    0.3
}

impl Step {
    pub fn new(role: Role, text: impl Into<String>, press_enter: bool, pre_delay_secs: f32) -> Self {
        Self {
            role,
            text: text.into(),
            press_enter,
            pre_delay_secs,
        }
    }

    /// Pre-type delay with the [0, 5] second clamp applied.
    ///
    /// Clamping happens here so values arriving through deserialization get
    /// the same treatment as constructed ones.
    pub fn pre_delay(&self) -> Duration {
        let secs = self.pre_delay_secs.clamp(0.0, MAX_PRE_DELAY_SECS);
        Duration::from_secs_f32(secs)
    }

    /// Truncated single-line preview of the step text.
    pub fn preview(&self, max_len: usize) -> String {
        let flat: String = self
            .text
            .chars()
            .map(|c| if c == '\n' { ' ' } else { c })
            .collect();
        if flat.chars().count() > max_len {
            let cut: String = flat.chars().take(max_len.saturating_sub(3)).collect();
            format!("{}...", cut)
        } else {
            flat
        }
    }
}

/// A complete demo script. Step order is significant and author-defined.
#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_name() -> String {
    "New Script".into()
}

impl Script {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// A zero-step script is still runnable; it completes on the first trigger.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn step(&self, idx: usize) -> Option<&Step> {
        self.steps.get(idx)
    }
}
