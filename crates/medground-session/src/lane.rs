//! Lane state machines
//!
//! Each lane is a small finite-state machine with a pure transition table.
//! An event that is not legal in the current phase yields `None` and leaves
//! the phase untouched.

use serde::Serialize;

/// Phase of the extraction lane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionPhase {
    #[default]
    Idle,
    Extracting,
}

/// Events driving the extraction lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionEvent {
    Submit,
    /// The extraction call finished, successfully or not
    Resolved,
}

impl ExtractionPhase {
    pub fn advance(self, event: ExtractionEvent) -> Option<Self> {
        match (self, event) {
            (Self::Idle, ExtractionEvent::Submit) => Some(Self::Extracting),
            (Self::Extracting, ExtractionEvent::Resolved) => Some(Self::Idle),
            _ => None,
        }
    }

    /// Apply `event` in place; returns false if it was not legal
    pub fn apply(&mut self, event: ExtractionEvent) -> bool {
        match self.advance(event) {
            Some(next) => {
                *self = next;
                true
            }
            None => false,
        }
    }

    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

/// Phase of the assistant lane
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssistantPhase {
    #[default]
    Idle,
    Synthesizing,
    Generating,
}

/// Events driving the assistant lane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantEvent {
    Submit,
    Synthesized,
    Answered,
    Failed,
}

impl AssistantPhase {
    pub fn advance(self, event: AssistantEvent) -> Option<Self> {
        match (self, event) {
            (Self::Idle, AssistantEvent::Submit) => Some(Self::Synthesizing),
            (Self::Synthesizing, AssistantEvent::Synthesized) => Some(Self::Generating),
            (Self::Generating, AssistantEvent::Answered) => Some(Self::Idle),
            (Self::Synthesizing | Self::Generating, AssistantEvent::Failed) => Some(Self::Idle),
            _ => None,
        }
    }

    /// Apply `event` in place; returns false if it was not legal
    pub fn apply(&mut self, event: AssistantEvent) -> bool {
        match self.advance(event) {
            Some(next) => {
                *self = next;
                true
            }
            None => false,
        }
    }

    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}
