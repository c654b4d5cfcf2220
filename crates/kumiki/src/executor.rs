//! The polling loop that feeds task updates to the [`Engine`].

use crate::config::ExecutorConfig;
use crate::engine::Engine;
use kumiki_core::{EngineError, TaskUpdate};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

/// Pulls task updates off the bus in batches and hands them to the engine.
///
/// Updates of different workflows are processed concurrently; updates of the
/// same workflow are processed one at a time in arrival order.
#[derive(Debug)]
pub struct Executor {
    engine: Arc<Engine>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(engine: Arc<Engine>, config: ExecutorConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { engine, config })
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Polls one batch, processes it and commits it.
    ///
    /// Returns the number of updates processed.
    pub async fn run_once(&self) -> Result<usize, EngineError> {
        let updates = self.poll().await?;
        self.finish_batch(updates).await
    }

    /// Runs until `shutdown` turns `true` or its sender is dropped.
    ///
    /// Shutdown is checked before every poll and interrupts a poll that is
    /// waiting; a batch that was already taken is always processed and
    /// committed first. Bus errors are logged and the loop carries on.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Executor started (batch size {}, poll timeout {:?})",
            self.config.batch_size, self.config.poll_timeout
        );
        loop {
            if *shutdown.borrow() {
                break;
            }

            let polled = tokio::select! {
                polled = self.poll() => polled,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let result = match polled {
                Ok(updates) => self.finish_batch(updates).await,
                Err(err) => Err(err),
            };
            if let Err(err) = result {
                error!("Executor iteration failed: {}", err);
            }
        }
        info!("Executor stopped");
    }

    async fn poll(&self) -> Result<Vec<TaskUpdate>, EngineError> {
        let updates = self
            .engine
            .bus()
            .poll(self.config.batch_size, self.config.poll_timeout)
            .await?;
        Ok(updates)
    }

    async fn finish_batch(&self, updates: Vec<TaskUpdate>) -> Result<usize, EngineError> {
        let count = updates.len();
        if count > 0 {
            self.process_batch(updates).await;
        }
        self.engine.bus().commit().await?;
        Ok(count)
    }

    async fn process_batch(&self, updates: Vec<TaskUpdate>) {
        let mut groups = JoinSet::new();
        for group in group_by_workflow(updates) {
            let engine = Arc::clone(&self.engine);
            groups.spawn(async move {
                for update in group {
                    if let Err(err) = engine.handle_update(&update).await {
                        engine.report_error(&update, &err).await;
                    }
                }
            });
        }
        while let Some(joined) = groups.join_next().await {
            if let Err(err) = joined {
                error!("Workflow update group aborted: {}", err);
            }
        }
    }
}

/// Splits a batch into per-workflow groups, keeping arrival order within
/// each group and ordering groups by first appearance.
fn group_by_workflow(updates: Vec<TaskUpdate>) -> Vec<Vec<TaskUpdate>> {
    let mut positions: HashMap<Uuid, usize> = HashMap::new();
    let mut groups: Vec<Vec<TaskUpdate>> = Vec::new();
    for update in updates {
        let index = *positions.entry(update.workflow_id).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[index].push(update);
    }
    groups
}
