//! Listing filters and aggregate statistics over operation records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::kind::OperationKind;
use crate::record::OperationRecord;
use crate::status::OperationStatus;
use crate::types::{OperationId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Page size used when a filter does not specify one.
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Largest page size a caller may request.
pub const MAX_LIST_LIMIT: usize = 500;

/// Number of operations reported in `recent_operations` by default.
pub const DEFAULT_RECENT_OPERATIONS: usize = 10;

/// Clamp a requested page size into `1..=MAX_LIST_LIMIT`.
pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
}

// ---------------------------------------------------------------------------
// OperationFilter
// ---------------------------------------------------------------------------

/// All fields are optional; an empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFilter {
    pub status: Option<OperationStatus>,
    pub kind: Option<OperationKind>,
    pub created_by: Option<String>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<Timestamp>,
    /// Exclusive upper bound on `created_at`.
    pub created_before: Option<Timestamp>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl OperationFilter {
    pub fn matches(&self, record: &OperationRecord) -> bool {
        self.status.map_or(true, |s| record.status == s)
            && self.kind.map_or(true, |k| record.kind == k)
            && self
                .created_by
                .as_deref()
                .map_or(true, |c| record.created_by == c)
            && self.created_after.map_or(true, |t| record.created_at >= t)
            && self.created_before.map_or(true, |t| record.created_at < t)
    }

    /// Filter, order by creation and page `records`.
    pub fn apply(&self, mut records: Vec<OperationRecord>) -> Vec<OperationRecord> {
        records.retain(|r| self.matches(r));
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        records
            .into_iter()
            .skip(self.offset.unwrap_or(0))
            .take(clamp_limit(self.limit))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Compact view of an operation for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub id: OperationId,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub progress: u8,
    pub total: usize,
    pub created_by: String,
    pub created_at: Timestamp,
}

impl From<&OperationRecord> for OperationSummary {
    fn from(record: &OperationRecord) -> Self {
        Self {
            id: record.id,
            kind: record.kind,
            status: record.status,
            progress: record.progress,
            total: record.results.total,
            created_by: record.created_by.clone(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationStatistics {
    pub total_operations: usize,
    pub running_operations: usize,
    /// `completed` plus `partially_completed`.
    pub completed_operations: usize,
    pub failed_operations: usize,
    /// Mean `actual_duration` of finished operations, in milliseconds.
    pub average_execution_time_ms: Option<f64>,
    pub operations_by_type: BTreeMap<OperationKind, usize>,
    /// Newest first.
    pub recent_operations: Vec<OperationSummary>,
}

/// Aggregate statistics over a snapshot of records.
pub fn compute_statistics(records: &[OperationRecord], recent: usize) -> OperationStatistics {
    let mut stats = OperationStatistics {
        total_operations: records.len(),
        ..Default::default()
    };

    let mut duration_sum_ms = 0f64;
    let mut duration_count = 0usize;

    for record in records {
        match record.status {
            OperationStatus::Running => stats.running_operations += 1,
            OperationStatus::Completed | OperationStatus::PartiallyCompleted => {
                stats.completed_operations += 1
            }
            OperationStatus::Failed => stats.failed_operations += 1,
            _ => {}
        }
        *stats.operations_by_type.entry(record.kind).or_insert(0) += 1;

        if record.is_terminal() {
            if let Some(duration) = record.actual_duration() {
                duration_sum_ms += duration.num_milliseconds() as f64;
                duration_count += 1;
            }
        }
    }

    if duration_count > 0 {
        stats.average_execution_time_ms = Some(duration_sum_ms / duration_count as f64);
    }

    let mut newest: Vec<&OperationRecord> = records.iter().collect();
    newest.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    stats.recent_operations = newest
        .into_iter()
        .take(recent)
        .map(OperationSummary::from)
        .collect();

    stats
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::catalog::OperationCatalog;
    use crate::options::{OperationOptions, OptionDefaults, OptionOverrides};
    use crate::record::NewOperation;
    use crate::types::{new_operation_id, Parameters};

    fn record(kind: OperationKind, created_by: &str) -> OperationRecord {
        let catalog = OperationCatalog::with_defaults();
        let options = OperationOptions::resolve(
            catalog.get(kind).unwrap(),
            &OptionOverrides::default(),
            &OptionDefaults::default(),
        )
        .unwrap();
        OperationRecord::new(NewOperation {
            id: new_operation_id(),
            kind,
            target_ids: vec!["a".into(), "b".into()],
            parameters: Parameters::new(),
            created_by: created_by.to_string(),
            options,
            estimated_duration_ms: 0,
        })
        .unwrap()
    }

    #[test]
    fn clamp_limit_bounds() {
        assert_eq!(clamp_limit(None), DEFAULT_LIST_LIMIT);
        assert_eq!(clamp_limit(Some(0)), 1);
        assert_eq!(clamp_limit(Some(10_000)), MAX_LIST_LIMIT);
    }

    #[test]
    fn empty_filter_matches_everything() {
        let rec = record(OperationKind::Export, "alice");
        assert!(OperationFilter::default().matches(&rec));
    }

    #[test]
    fn filter_by_kind_and_creator() {
        let records = vec![
            record(OperationKind::Export, "alice"),
            record(OperationKind::Export, "bob"),
            record(OperationKind::Scan, "alice"),
        ];
        let filter = OperationFilter {
            kind: Some(OperationKind::Export),
            created_by: Some("alice".into()),
            ..Default::default()
        };
        let found = filter.apply(records);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].created_by, "alice");
    }

    #[test]
    fn filter_by_date_range() {
        let rec = record(OperationKind::Export, "alice");
        let before = OperationFilter {
            created_before: Some(rec.created_at - Duration::seconds(1)),
            ..Default::default()
        };
        let after = OperationFilter {
            created_after: Some(rec.created_at),
            created_before: Some(Utc::now() + Duration::seconds(1)),
            ..Default::default()
        };
        assert!(!before.matches(&rec));
        assert!(after.matches(&rec));
    }

    #[test]
    fn apply_pages_results() {
        let records: Vec<_> = (0..5)
            .map(|_| record(OperationKind::Approval, "alice"))
            .collect();
        let mut ordered = records.clone();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let ordered_ids: Vec<_> = ordered.iter().map(|r| r.id).collect();
        let page = OperationFilter {
            limit: Some(2),
            offset: Some(1),
            ..Default::default()
        }
        .apply(records);
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), ordered_ids[1..3]);
    }

    #[test]
    fn statistics_count_by_status_and_type() {
        let mut done = record(OperationKind::Export, "alice");
        done.status = OperationStatus::PartiallyCompleted;
        done.started_at = Some(Utc::now() - Duration::milliseconds(400));
        done.completed_at = Some(Utc::now());
        let mut failed = record(OperationKind::Scan, "bob");
        failed.status = OperationStatus::Failed;
        let mut running = record(OperationKind::Export, "bob");
        running.status = OperationStatus::Running;

        let stats = compute_statistics(&[done, failed, running], 2);
        assert_eq!(stats.total_operations, 3);
        assert_eq!(stats.running_operations, 1);
        assert_eq!(stats.completed_operations, 1);
        assert_eq!(stats.failed_operations, 1);
        assert_eq!(stats.operations_by_type[&OperationKind::Export], 2);
        assert_eq!(stats.recent_operations.len(), 2);
        let avg = stats.average_execution_time_ms.unwrap();
        assert!((avg - 400.0).abs() < 50.0);
    }

    #[test]
    fn statistics_without_finished_operations_have_no_average() {
        let stats = compute_statistics(&[record(OperationKind::Export, "a")], 10);
        assert!(stats.average_execution_time_ms.is_none());
    }
}
