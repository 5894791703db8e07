//! Per-model result slots and the slot transition table.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::ArenaError;
use crate::protocol::TranslationResult;

/// What a slot holds once its model has answered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotPayload {
    pub result_id: i64,
    pub text: String,
    pub cost: f64,
    pub fingerprint: Option<String>,
    pub preset: Option<String>,
}

impl From<&TranslationResult> for SlotPayload {
    fn from(r: &TranslationResult) -> Self {
        SlotPayload {
            result_id: r.id,
            text: r.translation.clone(),
            cost: r.cost,
            fingerprint: r.response_hash.clone(),
            preset: r.preset.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SlotState {
    Pending,
    Filled(SlotPayload),
    Errored(String),
}

impl SlotState {
    pub fn status(&self) -> SlotStatus {
        match self {
            SlotState::Pending => SlotStatus::Pending,
            SlotState::Filled(_) => SlotStatus::Filled,
            SlotState::Errored(_) => SlotStatus::Errored,
        }
    }
}

/// Data-free view of [`SlotState`], used by the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotStatus {
    Pending,
    Filled,
    Errored,
}

/// Inputs that can move a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotInput {
    Result,
    Error,
    StreamEnd,
    TransportLost,
    RetryBegin,
}

/// The slot state machine. `None` means the input does not apply and the
/// slot must be left as it is.
pub fn transition(from: SlotStatus, input: SlotInput) -> Option<SlotStatus> {
    use SlotInput::*;
    use SlotStatus::*;
    match (from, input) {
        (Pending, Result) => Some(Filled),
        (Pending, Error) => Some(Errored),
        (Pending, StreamEnd) => Some(Errored),
        (Pending, TransportLost) => Some(Errored),
        (Errored, RetryBegin) => Some(Pending),
        _ => None,
    }
}

/// A user's verdict on one translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Rating {
    Rejected,
    Stars(u8),
}

impl Rating {
    /// Value sent to the backend: `-1` for a rejection, otherwise the stars.
    pub fn wire_value(self) -> i32 {
        match self {
            Rating::Rejected => -1,
            Rating::Stars(n) => i32::from(n),
        }
    }

    pub fn check_scale(self, scale: u8) -> Result<Self, ArenaError> {
        match self {
            Rating::Stars(n) if n == 0 || n > scale => Err(ArenaError::validation(format!(
                "rating must be between 1 and {} (or reject)",
                scale
            ))),
            _ => Ok(self),
        }
    }
}

impl FromStr for Rating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "r" | "reject" | "rejected" | "-1" | "x" => Ok(Rating::Rejected),
            other => other
                .parse::<u8>()
                .ok()
                .filter(|n| *n > 0)
                .map(Rating::Stars)
                .ok_or_else(|| format!("Unknown rating: {}", s)),
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rating::Rejected => write!(f, "rejected"),
            Rating::Stars(n) => write!(f, "{}", "★".repeat(usize::from(*n))),
        }
    }
}

/// One requested model's place in a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Slot {
    pub model_id: String,
    pub state: SlotState,
    /// Same output as an earlier slot in this session. Display only.
    pub duplicate: bool,
    pub rating: Option<Rating>,
    /// A single-model retry is in flight for this slot.
    pub retrying: bool,
}

impl Slot {
    pub fn pending(model_id: impl Into<String>) -> Self {
        Slot {
            model_id: model_id.into(),
            state: SlotState::Pending,
            duplicate: false,
            rating: None,
            retrying: false,
        }
    }

    pub fn status(&self) -> SlotStatus {
        self.state.status()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.state, SlotState::Pending)
    }

    pub fn is_filled(&self) -> bool {
        matches!(self.state, SlotState::Filled(_))
    }

    pub fn is_errored(&self) -> bool {
        matches!(self.state, SlotState::Errored(_))
    }

    pub fn payload(&self) -> Option<&SlotPayload> {
        match &self.state {
            SlotState::Filled(p) => Some(p),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            SlotState::Errored(msg) => Some(msg),
            _ => None,
        }
    }

    /// Apply `input` if the transition table allows it. Returns whether the
    /// slot changed.
    pub(crate) fn advance(&mut self, input: SlotInput, next: impl FnOnce() -> SlotState) -> bool {
        match transition(self.status(), input) {
            Some(_) => {
                self.state = next();
                true
            }
            None => false,
        }
    }
}
