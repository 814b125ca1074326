//! Job state machine.

use serde::{Deserialize, Serialize};

use crate::Error;

/// Lifecycle states of an ingestion job.
///
/// ```text
/// Pending --dispatch--> Running --success--> Complete
/// Pending --cancel--> Cancelled      Running --cancel--> Cancelled
/// Running --error--> Failed          {Failed, Cancelled} --retry--> Pending
/// ```
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobState {
    /// Admitted and waiting for a worker slot.
    #[default]
    Pending,
    /// Held by exactly one worker.
    Running,
    /// The asset is finalized and streamable.
    Complete,
    /// The provider reported a terminal error.
    Failed,
    /// Cancelled by a client before completion.
    Cancelled,
}

impl JobState {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }

    /// Check if a retry (or a re-submission) may reset this job.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }

    /// Validate a state transition.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        use JobState::*;

        matches!(
            (self, target),
            (Pending, Running | Cancelled)
                | (Running, Complete | Failed | Cancelled)
                | (Failed | Cancelled, Pending)
        )
    }

    /// Attempt to transition to a new state.
    pub fn transition_to(&self, target: JobState) -> Result<JobState, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::invalid_transition(self, target))
        }
    }
}
