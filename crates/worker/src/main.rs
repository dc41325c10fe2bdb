mod handlers;

use std::sync::Arc;

use anyhow::Context;
use bulkops_core::catalog::OperationCatalog;
use bulkops_core::kind::OperationKind;
use bulkops_core::options::OptionOverrides;
use bulkops_core::types::OperationId;
use bulkops_engine::{BulkOperationEngine, CreateOperation, EngineConfig, Entity, InMemoryGateway};
use bulkops_events::{OperationEvent, OperationEventKind};
use serde_json::json;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Number of demo user entities seeded into the gateway.
const DEMO_USERS: usize = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bulkops_worker=debug,bulkops_engine=debug".into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // --- Configuration ---
    let config = EngineConfig::from_env();
    tracing::info!(
        tick_interval_ms = config.tick_interval.as_millis() as u64,
        default_batch_size = config.default_batch_size,
        max_batch_size = config.max_batch_size,
        batch_delay_ms = config.batch_delay_ms,
        "Loaded engine configuration",
    );

    // --- Engine ---
    let gateway = Arc::new(seed_gateway());
    let export_sink = Arc::new(Mutex::new(Vec::new()));
    let engine = BulkOperationEngine::new(
        config,
        OperationCatalog::with_defaults(),
        Arc::clone(&gateway) as Arc<dyn bulkops_engine::EntityGateway>,
    );
    handlers::register_all(&engine, Arc::clone(&gateway), Arc::clone(&export_sink))
        .await
        .context("Failed to register handlers")?;

    let cancel = CancellationToken::new();
    let scheduler = engine.spawn_scheduler(cancel.clone());
    let mut events = engine.subscribe();

    // --- Demo operations ---
    let ids = submit_demo_operations(&engine).await?;
    let mut outstanding = ids.len();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, shutting down");
                break;
            }
            received = events.recv() => {
                match received {
                    Ok(event) => {
                        log_event(&event);
                        if matches!(event.event, OperationEventKind::Finished { .. } | OperationEventKind::Cancelled)
                            && ids.contains(&event.operation_id)
                        {
                            outstanding -= 1;
                            if outstanding == 0 {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    cancel.cancel();
    scheduler.await.context("Scheduler task failed")?;

    let stats = engine.statistics().await;
    let exported_lines = export_sink.lock().await.len();
    tracing::info!(
        exported_lines,
        remaining_entities = gateway.len().await,
        statistics = %serde_json::to_string(&stats)?,
        "Worker finished",
    );
    Ok(())
}

/// Users `u01..u30`; a few carry attributes the demo handlers react to.
fn seed_gateway() -> InMemoryGateway {
    InMemoryGateway::with_entities((1..=DEMO_USERS).map(|i| {
        let id = format!("u{i:02}");
        let attributes = json!({
            "status": if i % 7 == 0 { "suspended" } else { "active" },
            "approval_state": if i % 3 == 0 { "pending" } else { "none" },
            "protected": i == 2,
            "flagged": i % 11 == 0,
        });
        Entity::new(id, format!("User {i}")).with_attributes(attributes)
    }))
}

/// Create one operation per kind; the deletion is confirmed explicitly.
async fn submit_demo_operations(engine: &BulkOperationEngine) -> anyhow::Result<Vec<OperationId>> {
    let all_users: Vec<String> = (1..=DEMO_USERS).map(|i| format!("u{i:02}")).collect();
    let mut ids = Vec::new();

    ids.push(
        engine
            .create_operation(
                CreateOperation::new(OperationKind::StatusUpdate, all_users.clone(), "demo-admin")
                    .with_parameters(json!({ "status": "suspended", "reason": "quarterly review" })),
            )
            .await?,
    );
    ids.push(
        engine
            .create_operation(
                CreateOperation::new(OperationKind::Approval, all_users.clone(), "demo-admin")
                    .with_parameters(json!({ "decision": "approve" })),
            )
            .await?,
    );
    ids.push(
        engine
            .create_operation(
                CreateOperation::new(OperationKind::Export, all_users.clone(), "demo-auditor")
                    .with_parameters(json!({ "format": "csv" }))
                    .with_options(OptionOverrides {
                        batch_size: Some(25),
                        ..OptionOverrides::default()
                    }),
            )
            .await?,
    );
    ids.push(
        engine
            .create_operation(
                CreateOperation::new(OperationKind::Scan, all_users[..5].to_vec(), "demo-auditor")
                    .with_parameters(json!({ "scan_type": "full" })),
            )
            .await?,
    );

    let deletion = engine
        .create_operation(
            CreateOperation::new(
                OperationKind::Deletion,
                vec!["u01".into(), "u02".into(), "u03".into(), "missing".into()],
                "demo-admin",
            )
            .with_parameters(json!({ "reason": "account closure" })),
        )
        .await?;
    engine.confirm(deletion, "demo-supervisor").await?;
    engine.start(deletion).await?;
    ids.push(deletion);

    Ok(ids)
}

fn log_event(event: &OperationEvent) {
    match &event.event {
        OperationEventKind::BatchCompleted {
            batch,
            total_batches,
            progress,
            failed_in_batch,
        } => tracing::info!(
            operation_id = %event.operation_id,
            kind = %event.operation_kind,
            batch,
            total_batches,
            progress,
            failed_in_batch,
            "{}",
            event.name()
        ),
        OperationEventKind::Finished { status } => tracing::info!(
            operation_id = %event.operation_id,
            kind = %event.operation_kind,
            status = %status,
            "{}",
            event.name()
        ),
        _ => tracing::debug!(
            operation_id = %event.operation_id,
            kind = %event.operation_kind,
            "{}",
            event.name()
        ),
    }
}
