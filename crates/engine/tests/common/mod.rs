#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bulkops_core::catalog::OperationCatalog;
use bulkops_core::kind::OperationKind;
use bulkops_core::record::{ItemOutcome, OperationRecord};
use bulkops_core::status::OperationStatus;
use bulkops_core::types::OperationId;
use bulkops_engine::{
    BulkOperationEngine, EngineConfig, Entity, InMemoryGateway, ItemContext, OperationHandler,
};
use bulkops_events::{OperationEvent, OperationEventKind};
use tokio::sync::{broadcast, mpsc, watch};

/// Engine config for tests: no inter-batch delay and a fast tick.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        tick_interval: Duration::from_millis(10),
        batch_delay_ms: 0,
        ..EngineConfig::default()
    }
}

/// Target ids `t1..=tn`.
pub fn targets(n: usize) -> Vec<String> {
    (1..=n).map(|i| format!("t{i}")).collect()
}

/// Gateway holding entities `t1..=tn`.
pub fn gateway(n: usize) -> Arc<InMemoryGateway> {
    Arc::new(InMemoryGateway::with_entities(
        targets(n)
            .into_iter()
            .map(|id| Entity::new(id.clone(), format!("Entity {id}"))),
    ))
}

/// Engine over `gateway` with `handler` registered for every kind.
pub async fn engine_with(
    gateway: Arc<InMemoryGateway>,
    handler: Arc<ScriptedHandler>,
) -> BulkOperationEngine {
    let engine = BulkOperationEngine::new(test_config(), OperationCatalog::with_defaults(), gateway);
    for kind in OperationKind::ALL {
        engine
            .register_handler(kind, Arc::clone(&handler) as Arc<dyn OperationHandler>)
            .await
            .unwrap();
    }
    engine
}

/// Every event currently buffered on `rx`.
pub fn drain_events(rx: &mut broadcast::Receiver<OperationEvent>) -> Vec<OperationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Progress values of every `BatchCompleted` event for `id`, in order.
pub fn batch_progress(events: &[OperationEvent], id: OperationId) -> Vec<u8> {
    events
        .iter()
        .filter(|e| e.operation_id == id)
        .filter_map(|e| match e.event {
            OperationEventKind::BatchCompleted { progress, .. } => Some(progress),
            _ => None,
        })
        .collect()
}

/// Check the result counters against the target list.
pub fn assert_counters_consistent(record: &OperationRecord) {
    let r = &record.results;
    assert_eq!(r.total, record.target_ids.len());
    assert!(r.successful + r.failed + r.skipped <= r.total);
    if record.status == OperationStatus::Completed
        || record.status == OperationStatus::PartiallyCompleted
    {
        assert_eq!(r.successful + r.failed + r.skipped, r.total);
    }
    if r.successful + r.failed + r.skipped == r.total {
        assert!(record.is_terminal(), "all targets counted but status is {}", record.status);
    }
}

// ---------------------------------------------------------------------------
// ScriptedHandler
// ---------------------------------------------------------------------------

/// Handler whose per-target outcome is scripted by the test.
///
/// Records every call, can hold items at a gate until the test opens it,
/// and tracks how many distinct operations have items in flight at once.
#[derive(Default)]
pub struct ScriptedHandler {
    outcomes: HashMap<String, ItemOutcome>,
    panics: HashSet<String>,
    slow: HashMap<String, Duration>,
    gate: Option<watch::Receiver<bool>>,
    entered: Option<mpsc::UnboundedSender<String>>,
    timeout: Option<Duration>,
    calls: Mutex<Vec<(OperationId, String)>>,
    in_flight: Mutex<HashMap<OperationId, usize>>,
    max_concurrent_operations: Mutex<usize>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_on(mut self, target: &str, code: &str) -> Self {
        self.outcomes.insert(
            target.to_string(),
            ItemOutcome::failure(format!("{target} rejected"), code),
        );
        self
    }

    pub fn outcome(mut self, target: &str, outcome: ItemOutcome) -> Self {
        self.outcomes.insert(target.to_string(), outcome);
        self
    }

    pub fn panic_on(mut self, target: &str) -> Self {
        self.panics.insert(target.to_string());
        self
    }

    pub fn slow_on(mut self, target: &str, delay: Duration) -> Self {
        self.slow.insert(target.to_string(), delay);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Hold every item until the returned sender publishes `true`.
    ///
    /// The receiver yields the id of each target as it enters the handler.
    pub fn gated(mut self) -> (Self, watch::Sender<bool>, mpsc::UnboundedReceiver<String>) {
        let (gate_tx, gate_rx) = watch::channel(false);
        let (entered_tx, entered_rx) = mpsc::unbounded_channel();
        self.gate = Some(gate_rx);
        self.entered = Some(entered_tx);
        (self, gate_tx, entered_rx)
    }

    /// Target ids handled so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, target)| target.clone())
            .collect()
    }

    pub fn calls_for(&self, id: OperationId) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(op, _)| *op == id)
            .map(|(_, target)| target.clone())
            .collect()
    }

    pub fn max_concurrent_operations(&self) -> usize {
        *self.max_concurrent_operations.lock().unwrap()
    }

    fn enter(&self, op: OperationId, target: &str) {
        self.calls.lock().unwrap().push((op, target.to_string()));
        let mut in_flight = self.in_flight.lock().unwrap();
        *in_flight.entry(op).or_default() += 1;
        let mut max = self.max_concurrent_operations.lock().unwrap();
        *max = (*max).max(in_flight.len());
    }

    fn leave(&self, op: OperationId) {
        let mut in_flight = self.in_flight.lock().unwrap();
        if let Some(count) = in_flight.get_mut(&op) {
            *count -= 1;
            if *count == 0 {
                in_flight.remove(&op);
            }
        }
    }
}

#[async_trait]
impl OperationHandler for ScriptedHandler {
    async fn handle(&self, ctx: ItemContext) -> ItemOutcome {
        let target = ctx.entity.id.clone();
        self.enter(ctx.operation_id, &target);

        if let Some(entered) = &self.entered {
            let _ = entered.send(target.clone());
        }
        if let Some(gate) = &self.gate {
            let mut gate = gate.clone();
            loop {
                let open = *gate.borrow();
                if open || gate.changed().await.is_err() {
                    break;
                }
            }
        }
        if let Some(delay) = self.slow.get(&target) {
            tokio::time::sleep(*delay).await;
        }

        self.leave(ctx.operation_id);

        if self.panics.contains(&target) {
            panic!("handler blew up on {target}");
        }
        self.outcomes
            .get(&target)
            .cloned()
            .unwrap_or(ItemOutcome::Success)
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}
