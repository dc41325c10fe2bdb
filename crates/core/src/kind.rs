//! Operation kinds and risk levels.
//!
//! Kinds are a closed enum so handler registration and catalog lookups are
//! typed. The string forms are the wire/storage representation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Operation kind constants
// ---------------------------------------------------------------------------

/// Change the status field of each target.
pub const KIND_STATUS_UPDATE: &str = "status_update";
/// Approve or reject each target.
pub const KIND_APPROVAL: &str = "approval";
/// Delete each target.
pub const KIND_DELETION: &str = "deletion";
/// Export each target to an external format.
pub const KIND_EXPORT: &str = "export";
/// Run a scan against each target.
pub const KIND_SCAN: &str = "scan";

// ---------------------------------------------------------------------------
// OperationKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    StatusUpdate,
    Approval,
    Deletion,
    Export,
    Scan,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        Self::StatusUpdate,
        Self::Approval,
        Self::Deletion,
        Self::Export,
        Self::Scan,
    ];

    /// Return the storage string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusUpdate => KIND_STATUS_UPDATE,
            Self::Approval => KIND_APPROVAL,
            Self::Deletion => KIND_DELETION,
            Self::Export => KIND_EXPORT,
            Self::Scan => KIND_SCAN,
        }
    }
}

impl FromStr for OperationKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            KIND_STATUS_UPDATE => Ok(Self::StatusUpdate),
            KIND_APPROVAL => Ok(Self::Approval),
            KIND_DELETION => Ok(Self::Deletion),
            KIND_EXPORT => Ok(Self::Export),
            KIND_SCAN => Ok(Self::Scan),
            other => Err(CoreError::UnknownOperationKind(other.to_string())),
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RiskLevel
// ---------------------------------------------------------------------------

/// How much damage a mistaken run of an operation kind can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
