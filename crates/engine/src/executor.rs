//! Batch Executor: drives one operation through its batches.
//!
//! Targets are split into consecutive batches of `options.batch_size`.
//! Items inside a batch run concurrently and the executor waits for all of
//! them before moving on, which caps in-flight work at the batch size.
//! Pause and cancel are observed only at batch boundaries; an in-flight
//! batch always runs to completion.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use bulkops_core::batching::{batch_count, partition};
use bulkops_core::catalog::OperationCatalog;
use bulkops_core::error::CoreError;
use bulkops_core::kind::OperationKind;
use bulkops_core::options::OperationOptions;
use bulkops_core::record::{ItemOutcome, ItemResult, LogLevel};
use bulkops_core::status::OperationStatus;
use bulkops_core::types::{OperationId, Parameters, TargetId};
use bulkops_events::{EventBus, OperationEvent, OperationEventKind};
use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::RwLock;

use crate::gateway::{EntityGateway, GatewayError};
use crate::handler::{HandlerRegistry, ItemContext, OperationHandler};
use crate::store::OperationStore;

// ---------------------------------------------------------------------------
// Engine-synthesised failure codes
// ---------------------------------------------------------------------------

/// The target disappeared between creation and execution.
pub const CODE_TARGET_NOT_FOUND: &str = "TARGET_NOT_FOUND";
/// The entity store failed while loading the target.
pub const CODE_GATEWAY_ERROR: &str = "GATEWAY_ERROR";
/// The handler did not finish within the item timeout.
pub const CODE_ITEM_TIMEOUT: &str = "ITEM_TIMEOUT";
/// The handler panicked.
pub const CODE_HANDLER_PANIC: &str = "HANDLER_PANIC";

// ---------------------------------------------------------------------------
// ExecutionOutcome
// ---------------------------------------------------------------------------

/// How a call to [`BatchExecutor::execute`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The operation reached a terminal status.
    Finished(OperationStatus),
    /// An external pause, resume or cancel stopped the run at a batch
    /// boundary; the record holds the status that was observed.
    Stopped(OperationStatus),
}

// ---------------------------------------------------------------------------
// BatchExecutor
// ---------------------------------------------------------------------------

/// Executes operations against the handler registered for their kind.
///
/// Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct BatchExecutor {
    catalog: Arc<RwLock<OperationCatalog>>,
    handlers: Arc<RwLock<HandlerRegistry>>,
    gateway: Arc<dyn EntityGateway>,
    store: Arc<OperationStore>,
    events: Arc<EventBus>,
}

/// Per-run values shared by every item of every batch.
struct RunPlan {
    id: OperationId,
    kind: OperationKind,
    options: OperationOptions,
    parameters: Arc<Parameters>,
    remaining: Vec<TargetId>,
    first_batch_number: usize,
    total_batches: usize,
}

impl BatchExecutor {
    pub fn new(
        catalog: Arc<RwLock<OperationCatalog>>,
        handlers: Arc<RwLock<HandlerRegistry>>,
        gateway: Arc<dyn EntityGateway>,
        store: Arc<OperationStore>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            catalog,
            handlers,
            gateway,
            store,
            events,
        }
    }

    /// Run operation `id` from its cursor until it finishes or is stopped.
    ///
    /// The operation must be `pending` and confirmed. Operation-fatal
    /// problems (missing handler, item failure with `continue_on_error`
    /// off) are recorded as `failed` and reported as
    /// `Ok(Finished(Failed))`; `Err` is reserved for records that could
    /// not be started at all.
    pub async fn execute(&self, id: OperationId) -> Result<ExecutionOutcome, CoreError> {
        let (kind, resumed) = self
            .store
            .update(id, |r| {
                if r.awaiting_confirmation() {
                    return Err(CoreError::ConfirmationRequired(id));
                }
                r.transition(
                    OperationStatus::Validating,
                    LogLevel::Info,
                    "Validating operation",
                )?;
                Ok((r.kind, r.processed_count > 0))
            })
            .await?;

        let template_known = self.catalog.read().await.contains(kind);
        let handler = self.handlers.read().await.get(kind);
        let handler = match handler {
            Some(handler) if template_known => handler,
            Some(_) => {
                return self
                    .fail(id, kind, format!("No template registered for kind '{kind}'"))
                    .await;
            }
            None => {
                return self
                    .fail(id, kind, format!("No handler registered for kind '{kind}'"))
                    .await;
            }
        };

        let plan = self
            .store
            .update(id, |r| {
                let message = if resumed {
                    format!(
                        "Resuming at target {} of {}",
                        r.processed_count + 1,
                        r.target_ids.len()
                    )
                } else {
                    format!("Running {} target(s)", r.target_ids.len())
                };
                r.transition(OperationStatus::Running, LogLevel::Info, message)?;
                Ok(RunPlan {
                    id,
                    kind,
                    options: r.options.clone(),
                    parameters: Arc::new(r.parameters.clone()),
                    remaining: r.remaining_targets().to_vec(),
                    first_batch_number: r.batches_completed + 1,
                    total_batches: batch_count(r.target_ids.len(), r.options.batch_size),
                })
            })
            .await?;

        tracing::info!(
            operation_id = %id,
            kind = %kind,
            remaining = plan.remaining.len(),
            batch_size = plan.options.batch_size,
            resumed,
            "Operation started",
        );
        self.publish(id, kind, OperationEventKind::Started);

        self.run_batches(&plan, handler).await
    }

    /// Mark `id` failed after its run aborted outside the executor's
    /// control (e.g. the execution task panicked).
    ///
    /// Records that are already terminal are left untouched.
    pub async fn fail_aborted(&self, id: OperationId, reason: &str) {
        let kind = match self.store.get(id).await {
            Ok(record) if !record.is_terminal() => record.kind,
            _ => return,
        };
        if let Err(e) = self.fail(id, kind, reason.to_string()).await {
            tracing::error!(operation_id = %id, error = %e, "Failed to mark aborted operation");
        }
    }

    // ---- private helpers ----

    async fn run_batches(
        &self,
        plan: &RunPlan,
        handler: Arc<dyn OperationHandler>,
    ) -> Result<ExecutionOutcome, CoreError> {
        let batches: Vec<&[TargetId]> = partition(&plan.remaining, plan.options.batch_size).collect();
        let delay = Duration::from_millis(plan.options.delay_between_batches_ms);
        let timeout = handler
            .timeout()
            .or(plan.options.item_timeout_ms.map(Duration::from_millis));

        for (offset, batch) in batches.iter().enumerate() {
            let batch_number = plan.first_batch_number + offset;

            // Cooperative checkpoint: pause, resume and cancel land here.
            let status = self
                .store
                .update(plan.id, |r| {
                    if r.status == OperationStatus::Running {
                        r.current_step = Some(format!(
                            "Processing batch {batch_number} of {}",
                            plan.total_batches
                        ));
                    }
                    Ok(r.status)
                })
                .await?;
            if status != OperationStatus::Running {
                tracing::info!(
                    operation_id = %plan.id,
                    status = %status,
                    next_batch = batch_number,
                    "Operation stopped at batch boundary",
                );
                return Ok(ExecutionOutcome::Stopped(status));
            }

            let items = self.run_batch(plan, batch, &handler, timeout).await;
            let failed_in_batch = items.iter().filter(|i| i.outcome.is_failure()).count();

            let applied = self
                .store
                .update(plan.id, |r| {
                    r.apply_batch(batch_number, plan.total_batches, items)?;
                    Ok(r.progress)
                })
                .await;
            let progress = match applied {
                Ok(progress) => progress,
                Err(CoreError::InvalidState { status, .. }) => {
                    // Cancelled while the batch was in flight; the record is frozen.
                    tracing::warn!(
                        operation_id = %plan.id,
                        status = %status,
                        batch = batch_number,
                        discarded = batch.len(),
                        "Discarding in-flight batch outcomes for terminal operation",
                    );
                    return Ok(ExecutionOutcome::Stopped(status));
                }
                Err(e) => return Err(e),
            };

            tracing::info!(
                operation_id = %plan.id,
                batch = batch_number,
                total_batches = plan.total_batches,
                items = batch.len(),
                failed = failed_in_batch,
                progress,
                "Batch completed",
            );
            self.publish(
                plan.id,
                plan.kind,
                OperationEventKind::BatchCompleted {
                    batch: batch_number,
                    total_batches: plan.total_batches,
                    progress,
                    failed_in_batch,
                },
            );

            if failed_in_batch > 0 && !plan.options.continue_on_error {
                return self
                    .fail(
                        plan.id,
                        plan.kind,
                        format!(
                            "{failed_in_batch} item(s) failed in batch {batch_number} and continue_on_error is disabled"
                        ),
                    )
                    .await;
            }

            if offset + 1 < batches.len() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        self.finish(plan).await
    }

    /// Invoke the handler for every target of one batch concurrently.
    async fn run_batch(
        &self,
        plan: &RunPlan,
        batch: &[TargetId],
        handler: &Arc<dyn OperationHandler>,
        timeout: Option<Duration>,
    ) -> Vec<ItemResult> {
        join_all(
            batch
                .iter()
                .map(|target_id| self.run_item(plan, target_id, handler, timeout)),
        )
        .await
    }

    /// Load one target and run the handler on it, turning every failure
    /// mode into an [`ItemOutcome`].
    async fn run_item(
        &self,
        plan: &RunPlan,
        target_id: &TargetId,
        handler: &Arc<dyn OperationHandler>,
        timeout: Option<Duration>,
    ) -> ItemResult {
        let entity = match self.gateway.get(target_id).await {
            Ok(entity) => entity,
            Err(e) => {
                let code = match e {
                    GatewayError::NotFound(_) => CODE_TARGET_NOT_FOUND,
                    GatewayError::Unavailable(_) => CODE_GATEWAY_ERROR,
                };
                return ItemResult {
                    target_id: target_id.clone(),
                    target_label: None,
                    outcome: ItemOutcome::failure(e.to_string(), code),
                };
            }
        };
        let target_label = Some(entity.label.clone());

        let ctx = ItemContext {
            operation_id: plan.id,
            kind: plan.kind,
            entity,
            parameters: Arc::clone(&plan.parameters),
            dry_run: plan.options.dry_run,
            create_backup: plan.options.create_backup,
        };

        let guarded = AssertUnwindSafe(handler.handle(ctx)).catch_unwind();
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, guarded)
                .await
                .unwrap_or_else(|_| {
                    Ok(ItemOutcome::failure(
                        format!("Handler did not finish within {} ms", limit.as_millis()),
                        CODE_ITEM_TIMEOUT,
                    ))
                }),
            None => guarded.await,
        };

        let outcome = result.unwrap_or_else(|payload| {
            tracing::error!(
                operation_id = %plan.id,
                target_id = %target_id,
                "Handler panicked",
            );
            ItemOutcome::failure(
                format!("Handler panicked: {}", panic_message(payload.as_ref())),
                CODE_HANDLER_PANIC,
            )
        });

        ItemResult {
            target_id: target_id.clone(),
            target_label,
            outcome,
        }
    }

    /// Settle a run whose batches all completed.
    ///
    /// A pause or resume that arrived during the final batch has no
    /// boundary left to stop at, so those records settle as well.
    async fn finish(&self, plan: &RunPlan) -> Result<ExecutionOutcome, CoreError> {
        let settled = self
            .store
            .update(plan.id, |r| {
                let all_processed = r.processed_count >= r.target_ids.len();
                match r.status {
                    OperationStatus::Running => {}
                    OperationStatus::Paused | OperationStatus::Pending if all_processed => {}
                    status => return Ok(ExecutionOutcome::Stopped(status)),
                }
                let results = &r.results;
                let (to, level) = if results.failed > 0 {
                    (OperationStatus::PartiallyCompleted, LogLevel::Warning)
                } else {
                    (OperationStatus::Completed, LogLevel::Info)
                };
                let message = format!(
                    "Operation {}: {} succeeded, {} failed, {} skipped",
                    to, results.successful, results.failed, results.skipped
                );
                r.transition(to, level, message)?;
                Ok(ExecutionOutcome::Finished(to))
            })
            .await?;

        if let ExecutionOutcome::Finished(status) = settled {
            tracing::info!(operation_id = %plan.id, status = %status, "Operation finished");
            self.publish(plan.id, plan.kind, OperationEventKind::Finished { status });
        }
        Ok(settled)
    }

    /// Abort the operation with an error log entry.
    async fn fail(
        &self,
        id: OperationId,
        kind: OperationKind,
        reason: String,
    ) -> Result<ExecutionOutcome, CoreError> {
        tracing::error!(operation_id = %id, kind = %kind, reason = %reason, "Operation failed");

        let settled = self
            .store
            .update(id, |r| {
                if r.is_terminal() {
                    return Ok(ExecutionOutcome::Stopped(r.status));
                }
                r.transition(OperationStatus::Failed, LogLevel::Error, reason)?;
                Ok(ExecutionOutcome::Finished(OperationStatus::Failed))
            })
            .await?;

        if settled == ExecutionOutcome::Finished(OperationStatus::Failed) {
            self.publish(
                id,
                kind,
                OperationEventKind::Finished {
                    status: OperationStatus::Failed,
                },
            );
        }
        Ok(settled)
    }

    fn publish(&self, id: OperationId, kind: OperationKind, event: OperationEventKind) {
        self.events.publish(OperationEvent::new(id, kind, event));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
