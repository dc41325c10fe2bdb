//! `BulkOperationEngine`: the facade callers drive operations through.
//!
//! Owns the catalog, handler registry, record store, queue, event bus and
//! scheduler, and wires them together. Every engine-exposed operation is a
//! method here; transitions requested by callers are validated against the
//! state machine under the record's write lock.

use std::sync::Arc;

use bulkops_core::batching::dedup_preserving_order;
use bulkops_core::catalog::{OperationCatalog, OperationTemplate};
use bulkops_core::error::CoreError;
use bulkops_core::kind::OperationKind;
use bulkops_core::options::{OperationOptions, OptionOverrides};
use bulkops_core::query::{OperationFilter, OperationStatistics};
use bulkops_core::record::{LogLevel, NewOperation, OperationRecord};
use bulkops_core::status::{state_machine, OperationStatus};
use bulkops_core::types::{new_operation_id, OperationId, TargetId};
use bulkops_events::{EventBus, OperationEvent, OperationEventKind};
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::executor::BatchExecutor;
use crate::gateway::EntityGateway;
use crate::handler::{HandlerRegistry, OperationHandler};
use crate::queue::ExecutionQueue;
use crate::scheduler::Scheduler;
use crate::store::OperationStore;

// ---------------------------------------------------------------------------
// Request DTO
// ---------------------------------------------------------------------------

/// Input for [`BulkOperationEngine::create_operation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOperation {
    pub kind: OperationKind,
    pub target_ids: Vec<TargetId>,
    /// JSON object checked against the template's parameter schema.
    #[serde(default)]
    pub parameters: serde_json::Value,
    pub created_by: String,
    #[serde(default)]
    pub options: OptionOverrides,
}

impl CreateOperation {
    pub fn new(kind: OperationKind, target_ids: Vec<TargetId>, created_by: impl Into<String>) -> Self {
        Self {
            kind,
            target_ids,
            parameters: serde_json::Value::Null,
            created_by: created_by.into(),
            options: OptionOverrides::default(),
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_options(mut self, options: OptionOverrides) -> Self {
        self.options = options;
        self
    }
}

// ---------------------------------------------------------------------------
// BulkOperationEngine
// ---------------------------------------------------------------------------

pub struct BulkOperationEngine {
    config: EngineConfig,
    catalog: Arc<RwLock<OperationCatalog>>,
    handlers: Arc<RwLock<HandlerRegistry>>,
    gateway: Arc<dyn EntityGateway>,
    store: Arc<OperationStore>,
    queue: Arc<ExecutionQueue>,
    events: Arc<EventBus>,
    scheduler: Arc<Scheduler>,
}

impl BulkOperationEngine {
    pub fn new(
        config: EngineConfig,
        catalog: OperationCatalog,
        gateway: Arc<dyn EntityGateway>,
    ) -> Self {
        let catalog = Arc::new(RwLock::new(catalog));
        let handlers = Arc::new(RwLock::new(HandlerRegistry::new()));
        let store = Arc::new(OperationStore::new());
        let queue = Arc::new(ExecutionQueue::new());
        let events = Arc::new(EventBus::new(config.event_capacity));

        let executor = BatchExecutor::new(
            Arc::clone(&catalog),
            Arc::clone(&handlers),
            Arc::clone(&gateway),
            Arc::clone(&store),
            Arc::clone(&events),
        );
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&queue),
            Arc::clone(&store),
            executor,
            config.tick_interval,
        ));

        Self {
            config,
            catalog,
            handlers,
            gateway,
            store,
            queue,
            events,
            scheduler,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ---- catalog & handlers ----

    /// Insert or replace the template for `template.kind`.
    ///
    /// Existing operations keep the parameters and options they were
    /// created with.
    pub async fn register_template(&self, template: OperationTemplate) {
        tracing::info!(kind = %template.kind, "Operation template registered");
        self.catalog.write().await.register(template);
    }

    /// Register the item handler for `kind`.
    pub async fn register_handler(
        &self,
        kind: OperationKind,
        handler: Arc<dyn OperationHandler>,
    ) -> Result<(), CoreError> {
        let catalog = self.catalog.read().await;
        self.handlers.write().await.register(&catalog, kind, handler)?;
        tracing::debug!(kind = %kind, "Operation handler registered");
        Ok(())
    }

    pub async fn list_catalog(&self) -> Vec<OperationTemplate> {
        self.catalog.read().await.list()
    }

    // ---- creation ----

    /// Validate and persist a new operation in `pending`.
    ///
    /// The operation is queued straight away unless it needs confirmation.
    pub async fn create_operation(&self, req: CreateOperation) -> Result<OperationId, CoreError> {
        let template = {
            let catalog = self.catalog.read().await;
            match catalog.get(req.kind) {
                Ok(template) => template.clone(),
                Err(_) => return Err(CoreError::UnknownOperationKind(req.kind.to_string())),
            }
        };

        let mut messages = Vec::new();
        let parameters = match template
            .parameter_schema
            .resolve(&template.default_parameters, &req.parameters)
        {
            Ok(parameters) => Some(parameters),
            Err(CoreError::InvalidParameters(errs)) => {
                messages.extend(errs);
                None
            }
            Err(e) => return Err(e),
        };
        let options = match OperationOptions::resolve(
            &template,
            &req.options,
            &self.config.option_defaults(),
        ) {
            Ok(options) => Some(options),
            Err(CoreError::InvalidParameters(errs)) => {
                messages.extend(errs);
                None
            }
            Err(e) => return Err(e),
        };
        let (Some(parameters), Some(options)) = (parameters, options) else {
            return Err(CoreError::InvalidParameters(messages));
        };

        let created_by = req.created_by.trim();
        if created_by.is_empty() {
            return Err(CoreError::Validation("created_by must not be empty".into()));
        }

        let target_ids = self.existing_targets(req.target_ids).await?;
        if target_ids.is_empty() {
            return Err(CoreError::NoValidTargets);
        }

        let id = new_operation_id();
        let target_count = target_ids.len();
        let estimated_duration_ms =
            u64::try_from(template.estimate_duration(target_count).as_millis()).unwrap_or(u64::MAX);
        let record = OperationRecord::new(NewOperation {
            id,
            kind: req.kind,
            target_ids,
            parameters,
            created_by: created_by.to_string(),
            options,
            estimated_duration_ms,
        })?;
        let needs_confirmation = record.awaiting_confirmation();
        self.store.insert(record).await?;

        tracing::info!(
            operation_id = %id,
            kind = %req.kind,
            targets = target_count,
            created_by = %created_by,
            needs_confirmation,
            "Operation created",
        );
        self.publish(id, req.kind, OperationEventKind::Created { target_count });

        if !needs_confirmation {
            self.enqueue(id, req.kind).await?;
        }
        Ok(id)
    }

    // ---- lifecycle ----

    /// Record the explicit confirmation an operation needs before `start`.
    pub async fn confirm(&self, id: OperationId, confirmed_by: &str) -> Result<(), CoreError> {
        let confirmed_by = confirmed_by.trim();
        if confirmed_by.is_empty() {
            return Err(CoreError::Validation("confirmed_by must not be empty".into()));
        }

        let kind = self
            .store
            .update(id, |r| {
                if r.status != OperationStatus::Pending || !r.awaiting_confirmation() {
                    return Err(r.invalid_state("confirm"));
                }
                r.confirmed_by = Some(confirmed_by.to_string());
                r.confirmed_at = Some(Utc::now());
                r.log(
                    LogLevel::Info,
                    format!("Operation confirmed by {confirmed_by}"),
                    None,
                )?;
                Ok(r.kind)
            })
            .await?;

        tracing::info!(operation_id = %id, confirmed_by = %confirmed_by, "Operation confirmed");
        self.publish(
            id,
            kind,
            OperationEventKind::Confirmed {
                confirmed_by: confirmed_by.to_string(),
            },
        );
        Ok(())
    }

    /// Queue a confirmed operation for execution.
    ///
    /// Operations that did not need confirmation are queued at creation, so
    /// `start` on them fails with `InvalidState`.
    pub async fn start(&self, id: OperationId) -> Result<(), CoreError> {
        let kind = self
            .store
            .update(id, |r| {
                if r.status != OperationStatus::Pending || r.queued_at.is_some() {
                    return Err(r.invalid_state("start"));
                }
                if r.awaiting_confirmation() {
                    return Err(CoreError::ConfirmationRequired(id));
                }
                mark_queued(r)?;
                Ok(r.kind)
            })
            .await?;
        self.push_to_queue(id, kind).await;
        Ok(())
    }

    /// Ask a running operation to stop at the next batch boundary.
    pub async fn pause(&self, id: OperationId) -> Result<(), CoreError> {
        let kind = self
            .store
            .update(id, |r| {
                if !state_machine::can_pause(r.status) {
                    return Err(r.invalid_state("pause"));
                }
                let message = format!(
                    "Paused after {} of {} target(s)",
                    r.processed_count,
                    r.target_ids.len()
                );
                r.transition(OperationStatus::Paused, LogLevel::Info, message)?;
                Ok(r.kind)
            })
            .await?;

        tracing::info!(operation_id = %id, "Operation paused");
        self.publish(id, kind, OperationEventKind::Paused);
        Ok(())
    }

    /// Re-queue a paused operation; it continues at the first unprocessed
    /// target and takes its turn behind whatever is already queued.
    pub async fn resume(&self, id: OperationId) -> Result<(), CoreError> {
        let kind = self
            .store
            .update(id, |r| {
                if !state_machine::can_resume(r.status) {
                    return Err(r.invalid_state("resume"));
                }
                r.transition(OperationStatus::Pending, LogLevel::Info, "Operation resumed")?;
                mark_queued(r)?;
                Ok(r.kind)
            })
            .await?;

        tracing::info!(operation_id = %id, "Operation resumed");
        self.publish(id, kind, OperationEventKind::Resumed);
        self.push_to_queue(id, kind).await;
        Ok(())
    }

    /// Cancel a non-terminal operation.
    ///
    /// Outcomes already recorded are kept; targets not yet processed are
    /// left out of the counters. A batch in flight finishes but its
    /// outcomes are discarded.
    pub async fn cancel(&self, id: OperationId) -> Result<(), CoreError> {
        let (kind, processed, total) = self
            .store
            .update(id, |r| {
                if !state_machine::can_cancel(r.status) {
                    return Err(r.invalid_state("cancel"));
                }
                let message = format!(
                    "Operation cancelled after {} of {} target(s)",
                    r.processed_count,
                    r.target_ids.len()
                );
                r.transition(OperationStatus::Cancelled, LogLevel::Warning, message)?;
                Ok((r.kind, r.processed_count, r.target_ids.len()))
            })
            .await?;
        self.queue.remove(id).await;

        tracing::warn!(operation_id = %id, processed, total, "Operation cancelled");
        self.publish(id, kind, OperationEventKind::Cancelled);
        Ok(())
    }

    // ---- queries ----

    pub async fn get_operation(&self, id: OperationId) -> Result<OperationRecord, CoreError> {
        self.store.get(id).await
    }

    pub async fn list_operations(&self, filter: &OperationFilter) -> Vec<OperationRecord> {
        self.store.list(filter).await
    }

    pub async fn statistics(&self) -> OperationStatistics {
        self.store.statistics(self.config.recent_operations).await
    }

    /// Operation ids waiting for the execution slot, head first.
    pub async fn queued_operations(&self) -> Vec<OperationId> {
        self.queue.snapshot().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.events.subscribe()
    }

    // ---- scheduling ----

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Start the background scheduler loop.
    pub fn spawn_scheduler(&self, cancel: CancellationToken) -> JoinHandle<()> {
        Arc::clone(&self.scheduler).spawn(cancel)
    }

    /// Run queued operations inline until the queue is empty.
    ///
    /// Returns how many executions were started. Intended for callers that
    /// do not run the background loop.
    pub async fn run_pending(&self) -> usize {
        let mut executed = 0;
        while self.scheduler.run_next().await {
            executed += 1;
        }
        executed
    }

    // ---- private helpers ----

    /// Trim, deduplicate and existence-check the requested targets.
    async fn existing_targets(&self, requested: Vec<TargetId>) -> Result<Vec<TargetId>, CoreError> {
        let candidates = dedup_preserving_order(
            requested
                .into_iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
        );

        let checks = join_all(candidates.iter().map(|id| self.gateway.exists(id))).await;

        let mut valid = Vec::with_capacity(candidates.len());
        for (id, exists) in candidates.into_iter().zip(checks) {
            if exists? {
                valid.push(id);
            } else {
                tracing::debug!(target_id = %id, "Dropping unknown target");
            }
        }
        Ok(valid)
    }

    async fn enqueue(&self, id: OperationId, kind: OperationKind) -> Result<(), CoreError> {
        self.store.update(id, mark_queued).await?;
        self.push_to_queue(id, kind).await;
        Ok(())
    }

    /// Hand an id already marked queued on its record to the scheduler.
    async fn push_to_queue(&self, id: OperationId, kind: OperationKind) {
        self.queue.enqueue(id).await;
        tracing::debug!(operation_id = %id, "Operation queued");
        self.publish(id, kind, OperationEventKind::Queued);
    }

    fn publish(&self, id: OperationId, kind: OperationKind, event: OperationEventKind) {
        self.events.publish(OperationEvent::new(id, kind, event));
    }
}

/// Stamp `queued_at`; runs inside the store update that checked the state.
fn mark_queued(r: &mut OperationRecord) -> Result<(), CoreError> {
    r.queued_at = Some(Utc::now());
    r.log(LogLevel::Info, "Queued for execution", None)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bulkops_core::record::ItemOutcome;
    use serde_json::json;

    use super::*;
    use crate::gateway::{Entity, InMemoryGateway};
    use crate::handler::handler_fn;

    async fn engine() -> BulkOperationEngine {
        let gateway = InMemoryGateway::with_entities(
            (1..=5).map(|i| Entity::new(format!("u{i}"), format!("User {i}"))),
        );
        let config = EngineConfig {
            batch_delay_ms: 0,
            ..EngineConfig::default()
        };
        let engine =
            BulkOperationEngine::new(config, OperationCatalog::with_defaults(), Arc::new(gateway));
        for kind in OperationKind::ALL {
            engine
                .register_handler(kind, Arc::new(handler_fn(|_ctx| async { ItemOutcome::Success })))
                .await
                .unwrap();
        }
        engine
    }

    fn status_update(targets: &[&str]) -> CreateOperation {
        CreateOperation::new(
            OperationKind::StatusUpdate,
            targets.iter().map(|t| t.to_string()).collect(),
            "admin",
        )
        .with_parameters(json!({ "status": "suspended" }))
    }

    // -- create_operation -----------------------------------------------------

    #[tokio::test]
    async fn create_dedups_filters_and_queues() {
        let engine = engine().await;
        let id = engine
            .create_operation(status_update(&["u2", "u1", "u2", "ghost", " u3 ", ""]))
            .await
            .unwrap();

        let record = engine.get_operation(id).await.unwrap();
        assert_eq!(record.target_ids, vec!["u2", "u1", "u3"]);
        assert_eq!(record.results.total, 3);
        assert_eq!(record.status, OperationStatus::Pending);
        assert_eq!(record.estimated_duration_ms, 600);
        assert!(record.queued_at.is_some());
        assert_eq!(engine.queued_operations().await, vec![id]);
    }

    #[tokio::test]
    async fn create_with_unregistered_template_is_unknown_kind() {
        let engine = BulkOperationEngine::new(
            EngineConfig::default(),
            OperationCatalog::new(),
            Arc::new(InMemoryGateway::new()),
        );
        let err = engine
            .create_operation(status_update(&["u1"]))
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::UnknownOperationKind(k) if k == "status_update");
    }

    #[tokio::test]
    async fn create_collects_parameter_and_option_errors() {
        let engine = engine().await;
        let req = CreateOperation::new(OperationKind::StatusUpdate, vec!["u1".into()], "admin")
            .with_parameters(json!({ "status": "exploded", "colour": "red" }))
            .with_options(OptionOverrides {
                batch_size: Some(0),
                ..OptionOverrides::default()
            });

        let err = engine.create_operation(req).await.unwrap_err();
        assert_matches!(err, CoreError::InvalidParameters(ref msgs) if msgs.len() == 3);
        assert!(engine.queued_operations().await.is_empty());
    }

    #[tokio::test]
    async fn create_rejects_blank_creator() {
        let engine = engine().await;
        let mut req = status_update(&["u1"]);
        req.created_by = "  ".into();
        assert_matches!(
            engine.create_operation(req).await,
            Err(CoreError::Validation(_))
        );
    }

    #[tokio::test]
    async fn create_without_valid_targets_fails() {
        let engine = engine().await;
        assert_matches!(
            engine.create_operation(status_update(&[])).await,
            Err(CoreError::NoValidTargets)
        );
        assert_matches!(
            engine.create_operation(status_update(&["nope", "nada"])).await,
            Err(CoreError::NoValidTargets)
        );
        assert_eq!(engine.statistics().await.total_operations, 0);
    }

    // -- confirm / start ------------------------------------------------------

    #[tokio::test]
    async fn deletion_waits_for_confirmation() {
        let engine = engine().await;
        let id = engine
            .create_operation(CreateOperation::new(
                OperationKind::Deletion,
                vec!["u1".into()],
                "admin",
            ))
            .await
            .unwrap();
        assert!(engine.queued_operations().await.is_empty());
        assert_matches!(engine.start(id).await, Err(CoreError::ConfirmationRequired(x)) if x == id);

        engine.confirm(id, "supervisor").await.unwrap();
        engine.start(id).await.unwrap();
        assert_eq!(engine.queued_operations().await, vec![id]);

        let record = engine.get_operation(id).await.unwrap();
        assert_eq!(record.confirmed_by.as_deref(), Some("supervisor"));
        assert!(record.options.create_backup);

        assert_matches!(
            engine.start(id).await,
            Err(CoreError::InvalidState { action: "start", .. })
        );
        assert_matches!(
            engine.confirm(id, "supervisor").await,
            Err(CoreError::InvalidState { action: "confirm", .. })
        );
    }

    #[tokio::test]
    async fn start_on_auto_queued_operation_is_invalid() {
        let engine = engine().await;
        let id = engine.create_operation(status_update(&["u1"])).await.unwrap();
        assert_matches!(
            engine.start(id).await,
            Err(CoreError::InvalidState { status: OperationStatus::Pending, .. })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_start_admits_exactly_one() {
        let engine = engine().await;
        let id = engine
            .create_operation(CreateOperation::new(
                OperationKind::Deletion,
                vec!["u1".into()],
                "admin",
            ))
            .await
            .unwrap();
        engine.confirm(id, "supervisor").await.unwrap();

        let (first, second) = tokio::join!(engine.start(id), engine.start(id));
        let results = [first, second];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(CoreError::InvalidState { action: "start", .. }))));

        let record = engine.get_operation(id).await.unwrap();
        let queued_logs = record
            .logs
            .iter()
            .filter(|l| l.message == "Queued for execution")
            .count();
        assert_eq!(queued_logs, 1);
        assert_eq!(engine.queued_operations().await, vec![id]);
    }

    // -- pause / resume / cancel ----------------------------------------------

    #[tokio::test]
    async fn pause_and_resume_require_matching_state() {
        let engine = engine().await;
        let id = engine.create_operation(status_update(&["u1"])).await.unwrap();
        assert_matches!(
            engine.pause(id).await,
            Err(CoreError::InvalidState { action: "pause", status: OperationStatus::Pending, .. })
        );
        assert_matches!(
            engine.resume(id).await,
            Err(CoreError::InvalidState { action: "resume", .. })
        );
    }

    #[tokio::test]
    async fn cancel_pending_removes_from_queue() {
        let engine = engine().await;
        let id = engine.create_operation(status_update(&["u1", "u2"])).await.unwrap();

        engine.cancel(id).await.unwrap();
        assert!(engine.queued_operations().await.is_empty());

        let record = engine.get_operation(id).await.unwrap();
        assert_eq!(record.status, OperationStatus::Cancelled);
        assert!(record.completed_at.is_some());
        assert_eq!(record.results.processed(), 0);

        let logs_before = record.logs.len();
        assert_matches!(
            engine.cancel(id).await,
            Err(CoreError::InvalidState { status: OperationStatus::Cancelled, .. })
        );
        assert_eq!(engine.get_operation(id).await.unwrap().logs.len(), logs_before);
        assert_eq!(engine.run_pending().await, 0);
    }

    #[tokio::test]
    async fn unknown_operation_is_not_found() {
        let engine = engine().await;
        let id = new_operation_id();
        assert_matches!(engine.get_operation(id).await, Err(CoreError::NotFound { .. }));
        assert_matches!(engine.cancel(id).await, Err(CoreError::NotFound { .. }));
    }

    // -- run_pending ----------------------------------------------------------

    #[tokio::test]
    async fn run_pending_completes_queue_in_order() {
        let engine = engine().await;
        let first = engine.create_operation(status_update(&["u1", "u2"])).await.unwrap();
        let second = engine
            .create_operation(
                CreateOperation::new(OperationKind::Export, vec!["u3".into()], "auditor"),
            )
            .await
            .unwrap();

        assert_eq!(engine.run_pending().await, 2);

        let first = engine.get_operation(first).await.unwrap();
        let second = engine.get_operation(second).await.unwrap();
        assert_eq!(first.status, OperationStatus::Completed);
        assert_eq!(second.status, OperationStatus::Completed);
        assert!(first.completed_at <= second.started_at);

        let stats = engine.statistics().await;
        assert_eq!(stats.total_operations, 2);
        assert_eq!(stats.completed_operations, 2);
        assert!(stats.average_execution_time_ms.is_some());
    }

    #[tokio::test]
    async fn missing_handler_fails_operation() {
        let gateway = InMemoryGateway::with_entities([Entity::new("u1", "User 1")]);
        let engine = BulkOperationEngine::new(
            EngineConfig::default(),
            OperationCatalog::with_defaults(),
            Arc::new(gateway),
        );
        let id = engine.create_operation(status_update(&["u1"])).await.unwrap();

        engine.run_pending().await;

        let record = engine.get_operation(id).await.unwrap();
        assert_eq!(record.status, OperationStatus::Failed);
        assert!(record
            .logs
            .last()
            .is_some_and(|l| l.level == LogLevel::Error && l.message.contains("No handler")));
    }

    #[tokio::test]
    async fn catalog_lists_default_kinds() {
        let engine = engine().await;
        let kinds: Vec<_> = engine.list_catalog().await.into_iter().map(|t| t.kind).collect();
        assert_eq!(kinds, OperationKind::ALL.to_vec());
    }
}
