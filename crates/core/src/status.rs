//! Operation status and lifecycle state machine.
//!
//! `pending -> validating -> running -> {completed | partially_completed |
//! failed | cancelled | paused}`. A paused operation is resumed by putting
//! it back in `pending`; the executor then continues from its cursor.
//! Once every target has an outcome the operation settles to a terminal
//! state, even from `paused` or `pending`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// OperationStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    /// Created, waiting for confirmation or for the scheduler.
    Pending,
    /// Momentary state while the executor checks the record before running.
    Validating,
    /// Owns the execution slot and is processing batches.
    Running,
    /// Stopped at a batch boundary; resumable.
    Paused,
    /// All batches processed with zero failures.
    Completed,
    /// Aborted by an operation-fatal error.
    Failed,
    /// Stopped by an explicit cancel.
    Cancelled,
    /// All batches processed, at least one item failed.
    PartiallyCompleted,
}

impl OperationStatus {
    pub const ALL: [OperationStatus; 8] = [
        Self::Pending,
        Self::Validating,
        Self::Running,
        Self::Paused,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
        Self::PartiallyCompleted,
    ];

    /// Return the storage string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::PartiallyCompleted => "partially_completed",
        }
    }

    /// Terminal states are absorbing: no transition and no field mutation.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::PartiallyCompleted
        )
    }
}

impl FromStr for OperationStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| {
                CoreError::Validation(format!("Unknown operation status: '{s}'"))
            })
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub mod state_machine {
    use super::OperationStatus::{self, *};

    /// Returns the set of statuses reachable from `from`.
    ///
    /// Terminal states return an empty slice.
    pub fn valid_transitions(from: OperationStatus) -> &'static [OperationStatus] {
        match from {
            // Pending and Paused settle directly when a pause or resume
            // landed while the final batch was still in flight.
            Pending => &[Validating, Completed, PartiallyCompleted, Failed, Cancelled],
            Validating => &[Running, Failed, Cancelled],
            Running => &[Paused, Completed, PartiallyCompleted, Failed, Cancelled],
            Paused => &[Pending, Completed, PartiallyCompleted, Failed, Cancelled],
            Completed | Failed | Cancelled | PartiallyCompleted => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: OperationStatus, to: OperationStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a state transition, returning an error message for invalid ones.
    pub fn validate_transition(from: OperationStatus, to: OperationStatus) -> Result<(), String> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(format!("Invalid transition: {from} -> {to}"))
        }
    }

    /// Only a running operation can be paused.
    pub fn can_pause(status: OperationStatus) -> bool {
        status == Running
    }

    /// Only a paused operation can be resumed.
    pub fn can_resume(status: OperationStatus) -> bool {
        status == Paused
    }

    /// Any non-terminal operation can be cancelled.
    pub fn can_cancel(status: OperationStatus) -> bool {
        !status.is_terminal()
    }
}
