//! Execution Queue: strict FIFO of operation ids awaiting the executor.
//!
//! Enqueue wakes the scheduler through a [`Notify`] so it does not have to
//! wait for its next tick.

use std::collections::VecDeque;

use bulkops_core::types::OperationId;
use tokio::sync::{Mutex, Notify};

#[derive(Default)]
pub struct ExecutionQueue {
    items: Mutex<VecDeque<OperationId>>,
    notify: Notify,
}

impl ExecutionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id` to the back of the queue and wake the scheduler.
    ///
    /// Returns `false` if `id` was already queued.
    pub async fn enqueue(&self, id: OperationId) -> bool {
        let mut items = self.items.lock().await;
        if items.contains(&id) {
            return false;
        }
        items.push_back(id);
        drop(items);
        self.notify.notify_one();
        true
    }

    /// Pop the head of the queue.
    pub async fn dequeue(&self) -> Option<OperationId> {
        self.items.lock().await.pop_front()
    }

    /// Drop `id` from the queue wherever it sits.
    pub async fn remove(&self, id: OperationId) -> bool {
        let mut items = self.items.lock().await;
        let before = items.len();
        items.retain(|queued| *queued != id);
        items.len() != before
    }

    /// Snapshot of queued ids, head first.
    pub async fn snapshot(&self) -> Vec<OperationId> {
        self.items.lock().await.iter().copied().collect()
    }

    /// Resolve once something is enqueued.
    ///
    /// A notification sent while nobody waits is stored, so an enqueue
    /// between two scheduler waits is not lost.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}
