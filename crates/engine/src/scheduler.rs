//! Background scheduler that feeds the single execution slot.
//!
//! Wakes on a fixed tick and whenever something is enqueued, pops the
//! queue head and runs it to completion before taking the next one. The
//! slot is a mutex held for the whole run, so at most one operation is
//! `validating` or `running` at any time.

use std::sync::Arc;
use std::time::Duration;

use bulkops_core::status::OperationStatus;
use bulkops_core::types::OperationId;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::executor::{BatchExecutor, ExecutionOutcome};
use crate::queue::ExecutionQueue;
use crate::store::OperationStore;

/// Background scheduler.
///
/// A single long-lived Tokio task. Each operation runs in its own spawned
/// task so a panic inside the executor marks that operation `failed`
/// instead of killing the loop.
pub struct Scheduler {
    queue: Arc<ExecutionQueue>,
    store: Arc<OperationStore>,
    executor: BatchExecutor,
    slot: Mutex<()>,
    current: RwLock<Option<OperationId>>,
    tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        queue: Arc<ExecutionQueue>,
        store: Arc<OperationStore>,
        executor: BatchExecutor,
        tick_interval: Duration,
    ) -> Self {
        Self {
            queue,
            store,
            executor,
            slot: Mutex::new(()),
            current: RwLock::new(None),
            tick_interval,
        }
    }

    /// Spawn [`run`](Self::run) onto the runtime.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Run the scheduler loop until the cancellation token is triggered.
    ///
    /// An operation already executing when the token fires runs to its
    /// next terminal or stopped state before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        tracing::info!(
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            "Operation scheduler started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Operation scheduler shutting down");
                    break;
                }
                _ = ticker.tick() => {}
                _ = self.queue.notified() => {}
            }

            while !cancel.is_cancelled() && self.run_next().await {}
        }
    }

    /// The operation currently holding the execution slot, if any.
    pub async fn current_operation(&self) -> Option<OperationId> {
        *self.current.read().await
    }

    /// Take the queue head and run it to completion.
    ///
    /// Returns `false` when nothing ran: the queue was empty or another
    /// caller holds the slot. Queue entries whose record is no longer
    /// runnable (cancelled, already started, unconfirmed) are dropped.
    pub async fn run_next(&self) -> bool {
        let Ok(_slot) = self.slot.try_lock() else {
            return false;
        };

        let Some(id) = self.next_runnable().await else {
            return false;
        };

        *self.current.write().await = Some(id);

        let executor = self.executor.clone();
        let handle = tokio::spawn(async move { executor.execute(id).await });

        match handle.await {
            Ok(Ok(ExecutionOutcome::Finished(status))) => {
                // A resume during the final batch re-queued an operation that is now done.
                self.queue.remove(id).await;
                tracing::debug!(operation_id = %id, status = %status, "Execution slot released");
            }
            Ok(Ok(ExecutionOutcome::Stopped(status))) => {
                tracing::debug!(operation_id = %id, status = %status, "Execution stopped early");
            }
            Ok(Err(e)) => {
                tracing::warn!(operation_id = %id, error = %e, "Operation could not be executed");
            }
            Err(join_err) => {
                tracing::error!(operation_id = %id, error = %join_err, "Execution task aborted");
                self.executor
                    .fail_aborted(id, &format!("Execution aborted: {join_err}"))
                    .await;
            }
        }

        *self.current.write().await = None;
        true
    }

    async fn next_runnable(&self) -> Option<OperationId> {
        while let Some(id) = self.queue.dequeue().await {
            match self.store.get(id).await {
                Ok(record)
                    if record.status == OperationStatus::Pending
                        && !record.awaiting_confirmation() =>
                {
                    return Some(id);
                }
                Ok(record) => {
                    tracing::debug!(
                        operation_id = %id,
                        status = %record.status,
                        "Dropping stale queue entry",
                    );
                }
                Err(e) => {
                    tracing::warn!(operation_id = %id, error = %e, "Queued operation vanished");
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use bulkops_core::catalog::OperationCatalog;
    use bulkops_core::kind::OperationKind;
    use bulkops_core::options::{OperationOptions, OptionDefaults, OptionOverrides};
    use bulkops_core::record::{ItemOutcome, NewOperation, OperationRecord};
    use bulkops_core::types::{new_operation_id, Parameters};
    use bulkops_events::EventBus;

    use super::*;
    use crate::gateway::{Entity, InMemoryGateway};
    use crate::handler::{handler_fn, HandlerRegistry};

    async fn fixture(
        handler_panics: bool,
    ) -> (Arc<Scheduler>, Arc<OperationStore>, Arc<ExecutionQueue>) {
        let catalog = OperationCatalog::with_defaults();
        let mut handlers = HandlerRegistry::new();
        handlers
            .register(
                &catalog,
                OperationKind::Export,
                Arc::new(handler_fn(move |_ctx| async move {
                    if handler_panics {
                        panic!("export exploded");
                    }
                    ItemOutcome::Success
                })),
            )
            .unwrap();
        let gateway = InMemoryGateway::with_entities((1..=3).map(|i| Entity::new(format!("u{i}"), format!("User {i}"))));

        let store = Arc::new(OperationStore::new());
        let queue = Arc::new(ExecutionQueue::new());
        let executor = BatchExecutor::new(
            Arc::new(RwLock::new(catalog)),
            Arc::new(RwLock::new(handlers)),
            Arc::new(gateway),
            Arc::clone(&store),
            Arc::new(EventBus::default()),
        );
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&queue),
            Arc::clone(&store),
            executor,
            Duration::from_millis(10),
        ));
        (scheduler, store, queue)
    }

    async fn insert_export(store: &OperationStore) -> OperationId {
        let catalog = OperationCatalog::with_defaults();
        let template = catalog.get(OperationKind::Export).unwrap();
        let overrides = OptionOverrides {
            delay_between_batches_ms: Some(0),
            ..OptionOverrides::default()
        };
        let options =
            OperationOptions::resolve(template, &overrides, &OptionDefaults::default()).unwrap();
        let id = new_operation_id();
        let record = OperationRecord::new(NewOperation {
            id,
            kind: OperationKind::Export,
            target_ids: vec!["u1".into(), "u2".into(), "u3".into()],
            parameters: Parameters::new(),
            created_by: "admin".into(),
            options,
            estimated_duration_ms: 300,
        })
        .unwrap();
        store.insert(record).await.unwrap();
        id
    }

    // -- run_next -----------------------------------------------------------

    #[tokio::test]
    async fn run_next_on_empty_queue_does_nothing() {
        let (scheduler, _, _) = fixture(false).await;
        assert!(!scheduler.run_next().await);
        assert_eq!(scheduler.current_operation().await, None);
    }

    #[tokio::test]
    async fn run_next_executes_queue_head_to_completion() {
        let (scheduler, store, queue) = fixture(false).await;
        let id = insert_export(&store).await;
        queue.enqueue(id).await;

        assert!(scheduler.run_next().await);

        let record = store.get(id).await.unwrap();
        assert_eq!(record.status, OperationStatus::Completed);
        assert_eq!(record.results.successful, 3);
        assert!(queue.snapshot().await.is_empty());
        assert_eq!(scheduler.current_operation().await, None);
    }

    #[tokio::test]
    async fn run_next_skips_stale_entries() {
        let (scheduler, store, queue) = fixture(false).await;
        let stale = insert_export(&store).await;
        let live = insert_export(&store).await;
        store
            .update(stale, |r| {
                r.transition(
                    OperationStatus::Cancelled,
                    bulkops_core::record::LogLevel::Info,
                    "cancelled",
                )
            })
            .await
            .unwrap();
        queue.enqueue(stale).await;
        queue.enqueue(live).await;

        assert!(scheduler.run_next().await);
        assert_eq!(store.status(stale).await.unwrap(), OperationStatus::Cancelled);
        assert_eq!(store.status(live).await.unwrap(), OperationStatus::Completed);
    }

    #[tokio::test]
    async fn panicking_handler_fails_item_not_scheduler() {
        let (scheduler, store, queue) = fixture(true).await;
        let first = insert_export(&store).await;
        let second = insert_export(&store).await;
        queue.enqueue(first).await;
        queue.enqueue(second).await;

        assert!(scheduler.run_next().await);
        assert!(scheduler.run_next().await);

        for id in [first, second] {
            let record = store.get(id).await.unwrap();
            assert_eq!(record.status, OperationStatus::PartiallyCompleted);
            assert_eq!(record.results.failed, 3);
            assert!(record
                .results
                .errors
                .iter()
                .all(|e| e.code.as_deref() == Some("HANDLER_PANIC")));
        }
    }

    // -- run loop -----------------------------------------------------------

    #[tokio::test]
    async fn run_loop_picks_up_enqueued_work_and_stops_on_cancel() {
        let (scheduler, store, queue) = fixture(false).await;
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&scheduler).spawn(cancel.clone());

        let id = insert_export(&store).await;
        queue.enqueue(id).await;

        let mut done = false;
        for _ in 0..200 {
            if store.status(id).await.unwrap() == OperationStatus::Completed {
                done = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(done, "operation never completed");

        cancel.cancel();
        handle.await.unwrap();
    }
}
