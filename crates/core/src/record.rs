//! The mutable per-operation record and its result/log structures.
//!
//! All mutation goes through methods on [`OperationRecord`] so the
//! lifecycle rules hold no matter who holds the record: transitions follow
//! the state machine, terminal records reject every change, and result
//! counters only move forward.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::kind::OperationKind;
use crate::options::OperationOptions;
use crate::status::{state_machine, OperationStatus};
use crate::types::{OperationId, Parameters, TargetId, Timestamp};

// ---------------------------------------------------------------------------
// Item outcomes
// ---------------------------------------------------------------------------

/// What a handler reports for a single target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Success,
    /// Succeeded, but something is worth flagging.
    SuccessWithWarning { message: String },
    Failure { message: String, code: String },
    Skipped { reason: String },
}

impl ItemOutcome {
    pub fn failure(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
            code: code.into(),
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::SuccessWithWarning {
            message: message.into(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

/// An item outcome tied to the target it was produced for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemResult {
    pub target_id: TargetId,
    pub target_label: Option<String>,
    pub outcome: ItemOutcome,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A recorded error or warning for one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemIssue {
    pub target_id: TargetId,
    pub target_label: Option<String>,
    pub message: String,
    pub code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationResults {
    /// Always `target_ids.len()`.
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
    pub warning_count: usize,
    pub errors: Vec<ItemIssue>,
    pub warnings: Vec<ItemIssue>,
}

impl OperationResults {
    fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    /// Items that have a recorded outcome.
    pub fn processed(&self) -> usize {
        self.successful + self.failed + self.skipped
    }
}

// ---------------------------------------------------------------------------
// Logs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub level: LogLevel,
    pub message: String,
    pub target_id: Option<TargetId>,
}

// ---------------------------------------------------------------------------
// OperationRecord
// ---------------------------------------------------------------------------

/// Inputs fixed at creation time.
#[derive(Debug, Clone)]
pub struct NewOperation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub target_ids: Vec<TargetId>,
    pub parameters: Parameters,
    pub created_by: String,
    pub options: OperationOptions,
    pub estimated_duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub kind: OperationKind,
    pub target_ids: Vec<TargetId>,
    pub parameters: Parameters,
    pub created_by: String,
    pub created_at: Timestamp,
    pub status: OperationStatus,
    pub progress: u8,
    pub current_step: Option<String>,
    pub options: OperationOptions,
    pub results: OperationResults,
    pub logs: Vec<LogEntry>,
    pub estimated_duration_ms: u64,
    /// Number of leading targets that already have an outcome.
    pub processed_count: usize,
    pub batches_completed: usize,
    pub confirmed_by: Option<String>,
    pub confirmed_at: Option<Timestamp>,
    /// Set while the operation sits in the execution queue.
    pub queued_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl OperationRecord {
    /// Build a fresh record in `pending`.
    ///
    /// Rejects an empty target list; callers filter targets before this.
    pub fn new(input: NewOperation) -> Result<Self, CoreError> {
        if input.target_ids.is_empty() {
            return Err(CoreError::NoValidTargets);
        }

        let now = Utc::now();
        let total = input.target_ids.len();
        let mut record = Self {
            id: input.id,
            kind: input.kind,
            target_ids: input.target_ids,
            parameters: input.parameters,
            created_by: input.created_by,
            created_at: now,
            status: OperationStatus::Pending,
            progress: 0,
            current_step: None,
            options: input.options,
            results: OperationResults::new(total),
            logs: Vec::new(),
            estimated_duration_ms: input.estimated_duration_ms,
            processed_count: 0,
            batches_completed: 0,
            confirmed_by: None,
            confirmed_at: None,
            queued_at: None,
            started_at: None,
            completed_at: None,
        };
        record.push_log(
            LogLevel::Info,
            format!("Operation created with {total} target(s)"),
            None,
        );
        Ok(record)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether the operation still waits for an explicit confirm.
    pub fn awaiting_confirmation(&self) -> bool {
        self.options.require_confirmation && self.confirmed_at.is_none()
    }

    /// Targets that have not been processed yet, in order.
    pub fn remaining_targets(&self) -> &[TargetId] {
        &self.target_ids[self.processed_count.min(self.target_ids.len())..]
    }

    /// Wall time between start and completion.
    pub fn actual_duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    /// Reject any change once the record is terminal.
    pub fn ensure_mutable(&self, action: &'static str) -> Result<(), CoreError> {
        if self.is_terminal() {
            Err(self.invalid_state(action))
        } else {
            Ok(())
        }
    }

    pub fn invalid_state(&self, action: &'static str) -> CoreError {
        CoreError::InvalidState {
            id: self.id,
            status: self.status,
            action,
        }
    }

    /// Append a log entry.
    pub fn log(
        &mut self,
        level: LogLevel,
        message: impl Into<String>,
        target_id: Option<TargetId>,
    ) -> Result<(), CoreError> {
        self.ensure_mutable("log")?;
        self.push_log(level, message.into(), target_id);
        Ok(())
    }

    /// Move to `to`, stamping timestamps and appending a log entry.
    pub fn transition(
        &mut self,
        to: OperationStatus,
        level: LogLevel,
        message: impl Into<String>,
    ) -> Result<(), CoreError> {
        if !state_machine::can_transition(self.status, to) {
            return Err(self.invalid_state(transition_action(to)));
        }

        let now = Utc::now();
        match to {
            OperationStatus::Validating if self.started_at.is_none() => {
                self.started_at = Some(now);
            }
            OperationStatus::Running => {
                self.queued_at = None;
            }
            OperationStatus::Pending | OperationStatus::Paused => {
                self.current_step = None;
            }
            _ => {}
        }
        if to.is_terminal() {
            self.completed_at = Some(now);
            self.queued_at = None;
            self.current_step = None;
            if to != OperationStatus::Cancelled && to != OperationStatus::Failed {
                self.progress = 100;
            }
        }

        self.status = to;
        self.push_log(level, message.into(), None);
        Ok(())
    }

    /// Record the outcomes of one finished batch and advance the cursor.
    ///
    /// `total_batches` is the batch count over the whole target list, so
    /// progress keeps increasing across a pause and resume.
    pub fn apply_batch(
        &mut self,
        batch_number: usize,
        total_batches: usize,
        items: Vec<ItemResult>,
    ) -> Result<(), CoreError> {
        self.ensure_mutable("record results for")?;

        let item_count = items.len();
        let mut batch_failed = 0;
        for item in items {
            batch_failed += usize::from(item.outcome.is_failure());
            self.apply_item(item);
        }

        self.processed_count += item_count;
        self.batches_completed += 1;
        let progress = crate::batching::progress_percent(self.batches_completed, total_batches);
        self.progress = self.progress.max(progress);

        let level = if batch_failed > 0 {
            LogLevel::Warning
        } else {
            LogLevel::Info
        };
        self.push_log(
            level,
            format!(
                "Batch {batch_number}/{total_batches} finished: {item_count} item(s), {batch_failed} failed"
            ),
            None,
        );
        Ok(())
    }

    fn apply_item(&mut self, item: ItemResult) {
        let ItemResult {
            target_id,
            target_label,
            outcome,
        } = item;

        match outcome {
            ItemOutcome::Success => {
                self.results.successful += 1;
            }
            ItemOutcome::SuccessWithWarning { message } => {
                self.results.successful += 1;
                self.results.warning_count += 1;
                self.push_log(LogLevel::Warning, message.clone(), Some(target_id.clone()));
                self.results.warnings.push(ItemIssue {
                    target_id,
                    target_label,
                    message,
                    code: None,
                });
            }
            ItemOutcome::Failure { message, code } => {
                self.results.failed += 1;
                self.push_log(
                    LogLevel::Error,
                    format!("{code}: {message}"),
                    Some(target_id.clone()),
                );
                self.results.errors.push(ItemIssue {
                    target_id,
                    target_label,
                    message,
                    code: Some(code),
                });
            }
            ItemOutcome::Skipped { reason } => {
                self.results.skipped += 1;
                self.push_log(LogLevel::Info, format!("Skipped: {reason}"), Some(target_id));
            }
        }
    }

    fn push_log(&mut self, level: LogLevel, message: String, target_id: Option<TargetId>) {
        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level,
            message,
            target_id,
        });
    }
}

fn transition_action(to: OperationStatus) -> &'static str {
    match to {
        OperationStatus::Pending => "requeue",
        OperationStatus::Validating | OperationStatus::Running => "start",
        OperationStatus::Paused => "pause",
        OperationStatus::Cancelled => "cancel",
        OperationStatus::Completed
        | OperationStatus::PartiallyCompleted
        | OperationStatus::Failed => "finish",
    }
}
