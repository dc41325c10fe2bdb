//! Demo item handlers, one per operation kind, over the in-memory gateway.
//!
//! They stand in for the application code a real deployment registers:
//! each reads its parameters from the [`ItemContext`] and mutates the
//! entity through the shared [`InMemoryGateway`].

use std::sync::Arc;

use async_trait::async_trait;
use bulkops_core::error::CoreError;
use bulkops_core::kind::OperationKind;
use bulkops_core::record::ItemOutcome;
use bulkops_engine::{BulkOperationEngine, GatewayError, InMemoryGateway, ItemContext, OperationHandler};
use serde_json::{json, Value};
use tokio::sync::Mutex;

/// Failure code for entities marked `protected`.
const CODE_PROTECTED: &str = "PROTECTED";

fn gateway_failure(err: GatewayError) -> ItemOutcome {
    let code = match err {
        GatewayError::NotFound(_) => "TARGET_NOT_FOUND",
        GatewayError::Unavailable(_) => "GATEWAY_ERROR",
    };
    ItemOutcome::failure(err.to_string(), code)
}

fn attribute<'a>(ctx: &'a ItemContext, key: &str) -> Option<&'a Value> {
    ctx.entity.attributes.get(key)
}

/// Register a demo handler for every kind.
pub async fn register_all(
    engine: &BulkOperationEngine,
    gateway: Arc<InMemoryGateway>,
    export_sink: Arc<Mutex<Vec<String>>>,
) -> Result<(), CoreError> {
    engine
        .register_handler(
            OperationKind::StatusUpdate,
            Arc::new(StatusUpdateHandler {
                gateway: Arc::clone(&gateway),
            }),
        )
        .await?;
    engine
        .register_handler(
            OperationKind::Approval,
            Arc::new(ApprovalHandler {
                gateway: Arc::clone(&gateway),
            }),
        )
        .await?;
    engine
        .register_handler(
            OperationKind::Deletion,
            Arc::new(DeletionHandler {
                gateway: Arc::clone(&gateway),
            }),
        )
        .await?;
    engine
        .register_handler(OperationKind::Export, Arc::new(ExportHandler { sink: export_sink }))
        .await?;
    engine
        .register_handler(OperationKind::Scan, Arc::new(ScanHandler))
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// status_update
// ---------------------------------------------------------------------------

pub struct StatusUpdateHandler {
    gateway: Arc<InMemoryGateway>,
}

#[async_trait]
impl OperationHandler for StatusUpdateHandler {
    async fn handle(&self, ctx: ItemContext) -> ItemOutcome {
        let Some(status) = ctx.param_str("status") else {
            return ItemOutcome::failure("missing status parameter", "INVALID_PARAMETERS");
        };
        if attribute(&ctx, "status").and_then(Value::as_str) == Some(status) {
            return ItemOutcome::warning(format!("already {status}"));
        }
        if ctx.dry_run {
            return ItemOutcome::skipped(format!("dry run: would set status to {status}"));
        }
        match self
            .gateway
            .set_attribute(&ctx.entity.id, "status", json!(status))
            .await
        {
            Ok(()) => ItemOutcome::Success,
            Err(e) => gateway_failure(e),
        }
    }
}

// ---------------------------------------------------------------------------
// approval
// ---------------------------------------------------------------------------

pub struct ApprovalHandler {
    gateway: Arc<InMemoryGateway>,
}

#[async_trait]
impl OperationHandler for ApprovalHandler {
    async fn handle(&self, ctx: ItemContext) -> ItemOutcome {
        if attribute(&ctx, "approval_state").and_then(Value::as_str) != Some("pending") {
            return ItemOutcome::skipped("not awaiting approval");
        }
        let state = match ctx.param_str("decision") {
            Some("approve") => "approved",
            Some("reject") => "rejected",
            _ => return ItemOutcome::failure("missing decision parameter", "INVALID_PARAMETERS"),
        };
        if ctx.dry_run {
            return ItemOutcome::skipped(format!("dry run: would mark {state}"));
        }
        match self
            .gateway
            .set_attribute(&ctx.entity.id, "approval_state", json!(state))
            .await
        {
            Ok(()) => ItemOutcome::Success,
            Err(e) => gateway_failure(e),
        }
    }
}

// ---------------------------------------------------------------------------
// deletion
// ---------------------------------------------------------------------------

pub struct DeletionHandler {
    gateway: Arc<InMemoryGateway>,
}

#[async_trait]
impl OperationHandler for DeletionHandler {
    async fn handle(&self, ctx: ItemContext) -> ItemOutcome {
        if attribute(&ctx, "protected").and_then(Value::as_bool) == Some(true) {
            return ItemOutcome::failure(
                format!("{} is protected", ctx.entity.label),
                CODE_PROTECTED,
            );
        }
        if ctx.dry_run {
            return ItemOutcome::skipped("dry run: would delete");
        }
        if ctx.create_backup {
            tracing::debug!(
                operation_id = %ctx.operation_id,
                target_id = %ctx.entity.id,
                snapshot = %ctx.entity.attributes,
                "Backup taken before deletion",
            );
        }

        let result = if ctx.param_bool("hard_delete").unwrap_or(false) {
            self.gateway.remove(&ctx.entity.id).await.map(|_| ())
        } else {
            self.gateway
                .set_attribute(&ctx.entity.id, "deleted", json!(true))
                .await
        };
        match result {
            Ok(()) => ItemOutcome::Success,
            Err(e) => gateway_failure(e),
        }
    }
}

// ---------------------------------------------------------------------------
// export
// ---------------------------------------------------------------------------

pub struct ExportHandler {
    sink: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl OperationHandler for ExportHandler {
    async fn handle(&self, ctx: ItemContext) -> ItemOutcome {
        let include_metadata = ctx.param_bool("include_metadata").unwrap_or(true);
        let line = match ctx.param_str("format").unwrap_or("json") {
            "csv" if include_metadata => format!(
                "{},{},{}",
                ctx.entity.id, ctx.entity.label, ctx.entity.attributes
            ),
            "csv" => format!("{},{}", ctx.entity.id, ctx.entity.label),
            _ if include_metadata => json!({
                "id": ctx.entity.id,
                "label": ctx.entity.label,
                "attributes": ctx.entity.attributes,
            })
            .to_string(),
            _ => json!({ "id": ctx.entity.id, "label": ctx.entity.label }).to_string(),
        };
        self.sink.lock().await.push(line);
        ItemOutcome::Success
    }
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

pub struct ScanHandler;

#[async_trait]
impl OperationHandler for ScanHandler {
    async fn handle(&self, ctx: ItemContext) -> ItemOutcome {
        let full = ctx.param_str("scan_type") == Some("full");
        let flagged = attribute(&ctx, "flagged").and_then(Value::as_bool) == Some(true);
        match (flagged, full) {
            (true, true) => ItemOutcome::failure("policy violation found", "SCAN_VIOLATION"),
            (true, false) => ItemOutcome::warning("suspicious content; run a full scan"),
            (false, _) => ItemOutcome::Success,
        }
    }
}
