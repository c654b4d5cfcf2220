//! Order saga that compensates when shipping fails.
//!
//! Demonstrates:
//! - Running the executor against the in-memory backend
//! - Input templates chaining task outputs
//! - Reverse-order compensation of completed tasks

use kumiki::prelude::*;
use kumiki::TaskType;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

/// Plays the worker side: acknowledges every dispatched task, then completes
/// it, except `ship` which always fails.
async fn work(backend: &MemoryBackend, seen: &mut usize) {
    let dispatched = backend.dispatched().await;
    for task in &dispatched[*seen..] {
        println!("Worker picked up '{}' ({:?})", task.task_reference_name, task.task_type);
        backend
            .publish_update(TaskUpdate::new(task, TaskStatus::Inprogress))
            .await;
        let outcome = if task.task_reference_name == "ship" && task.task_type == TaskType::Task {
            TaskUpdate::new(task, TaskStatus::Failed).with_log(json!("carrier unavailable"))
        } else {
            TaskUpdate::new(task, TaskStatus::Completed)
                .with_output(json!({"ref": format!("{}-ok", task.task_reference_name)}))
        };
        backend.publish_update(outcome).await;
    }
    *seen = dispatched.len();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let backend = Arc::new(MemoryBackend::new());
    let engine = Arc::new(Engine::builder().backend(backend.clone()).build()?);

    let definition = WorkflowDefinition::builder("ORDER", "1")
        .task(TaskNode::task("reserve_stock", "reserve").with_input("sku", "${workflow.input.sku}"))
        .task(TaskNode::task("charge_card", "charge").with_input("reservation", "${reserve.output.ref}"))
        .task(TaskNode::task("ship_parcel", "ship"))
        .failure_strategy(FailureStrategy::Compensate)
        .build()?;
    engine
        .start_transaction("order-1", definition, json!({"sku": "KMK-1"}))
        .await?;

    let config = ExecutorConfig::default().with_poll_timeout(Duration::from_millis(20));
    let executor = Arc::new(Executor::new(engine, config)?);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner = Arc::clone(&executor);
    let handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

    let mut seen = 0;
    let status = loop {
        work(&backend, &mut seen).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        match backend.transaction("order-1").await {
            Some(transaction) if transaction.status.is_terminal() => break transaction.status,
            _ => continue,
        }
    };
    println!("Transaction finished: {}", status);

    shutdown_tx.send(true)?;
    handle.await?;
    Ok(())
}
