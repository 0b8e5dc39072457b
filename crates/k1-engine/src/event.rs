//! Step events

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Started,
    Succeeded,
    Failed,
    Skipped,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Started => "started",
            Phase::Succeeded => "succeeded",
            Phase::Failed => "failed",
            Phase::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Phase::Started)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure detail carried by a `failed` event. The message is already redacted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventError {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Position in the reporter's stream, assigned on publish
    pub seq: u64,
    pub step_key: String,
    pub phase: Phase,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<EventError>,
}

impl Event {
    pub fn new(step_key: &str, phase: Phase, at: DateTime<Utc>) -> Self {
        Self {
            seq: 0,
            step_key: step_key.to_string(),
            phase,
            at,
            error: None,
        }
    }

    pub fn failed(step_key: &str, at: DateTime<Utc>, kind: ErrorKind, message: String) -> Self {
        Self {
            error: Some(EventError { kind, message }),
            ..Self::new(step_key, Phase::Failed, at)
        }
    }
}
