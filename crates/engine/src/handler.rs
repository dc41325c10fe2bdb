//! Per-kind item handlers and their typed registry.
//!
//! A handler receives one loaded target plus the operation's parameter
//! snapshot and reports an [`ItemOutcome`]. Handlers own their retry
//! policy; the engine never retries an item.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bulkops_core::catalog::OperationCatalog;
use bulkops_core::error::CoreError;
use bulkops_core::kind::OperationKind;
use bulkops_core::record::ItemOutcome;
use bulkops_core::types::{OperationId, Parameters};

use crate::gateway::Entity;

// ---------------------------------------------------------------------------
// ItemContext
// ---------------------------------------------------------------------------

/// Everything a handler needs to process one target.
#[derive(Debug, Clone)]
pub struct ItemContext {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub entity: Entity,
    pub parameters: Arc<Parameters>,
    /// Report what would happen without mutating anything.
    pub dry_run: bool,
    /// Snapshot the entity before mutating it.
    pub create_backup: bool,
}

impl ItemContext {
    /// String parameter lookup.
    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(|v| v.as_str())
    }

    /// Boolean parameter lookup.
    pub fn param_bool(&self, name: &str) -> Option<bool> {
        self.parameters.get(name).and_then(|v| v.as_bool())
    }
}

// ---------------------------------------------------------------------------
// OperationHandler
// ---------------------------------------------------------------------------

#[async_trait]
pub trait OperationHandler: Send + Sync {
    async fn handle(&self, ctx: ItemContext) -> ItemOutcome;

    /// Per-item time limit; overrides the operation's `item_timeout_ms`.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

/// Adapter turning an async closure into an [`OperationHandler`].
pub struct FnHandler<F> {
    func: F,
    timeout: Option<Duration>,
}

/// Wrap `func` as a handler.
pub fn handler_fn<F, Fut>(func: F) -> FnHandler<F>
where
    F: Fn(ItemContext) -> Fut + Send + Sync,
    Fut: Future<Output = ItemOutcome> + Send,
{
    FnHandler {
        func,
        timeout: None,
    }
}

impl<F> FnHandler<F> {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl<F, Fut> OperationHandler for FnHandler<F>
where
    F: Fn(ItemContext) -> Fut + Send + Sync,
    Fut: Future<Output = ItemOutcome> + Send,
{
    async fn handle(&self, ctx: ItemContext) -> ItemOutcome {
        (self.func)(ctx).await
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

// ---------------------------------------------------------------------------
// HandlerRegistry
// ---------------------------------------------------------------------------

/// Maps each operation kind to its handler.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<OperationKind, Arc<dyn OperationHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any previous one.
    ///
    /// Fails with `UnknownOperationKind` when `catalog` has no template
    /// for `kind`, so a misconfiguration surfaces at startup rather than
    /// when the first operation runs.
    pub fn register(
        &mut self,
        catalog: &OperationCatalog,
        kind: OperationKind,
        handler: Arc<dyn OperationHandler>,
    ) -> Result<(), CoreError> {
        if !catalog.contains(kind) {
            return Err(CoreError::UnknownOperationKind(kind.to_string()));
        }
        self.handlers.insert(kind, handler);
        Ok(())
    }

    pub fn get(&self, kind: OperationKind) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(&kind).cloned()
    }

}
