//! Instance state machine: reacts to task outcomes by dispatching the next
//! task, finishing the workflow, or applying the failure strategy.

use kumiki_core::{
    compensation_definition, compensation_tasks, find_task_path, get_next_task_path,
    map_parameters_to_value, results_input, task_results, template_context, EngineError, Event,
    FailureStrategy, Label, MessageBus, PathToken, TaskInstance, TaskInstanceStore, TaskNode,
    TaskPath, TaskResults, TaskStatus, TaskUpdate, TransactionInstance, TransactionInstanceStore,
    TransactionStatus, TransactionUpdate, WorkflowDefinition, WorkflowDefinitionStore,
    WorkflowInstance, WorkflowInstanceStore, WorkflowRef, WorkflowStatus, WorkflowType,
    WorkflowUpdate,
};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Boxed future returned by the engine's recursive steps.
pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EngineError>> + Send + 'a>>;

/// Drives transactions, workflows and tasks through their lifecycles.
///
/// The engine keeps no workflow state in memory: every step reloads what it
/// needs from the stores. Updates for one workflow must not be handled
/// concurrently; the [`Executor`](crate::Executor) serializes them per
/// workflow id.
pub struct Engine {
    tasks: Arc<dyn TaskInstanceStore>,
    workflows: Arc<dyn WorkflowInstanceStore>,
    transactions: Arc<dyn TransactionInstanceStore>,
    definitions: Arc<dyn WorkflowDefinitionStore>,
    bus: Arc<dyn MessageBus>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Creates a new engine builder.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    /// Creates a transaction and starts its root workflow.
    pub async fn start_transaction(
        &self,
        transaction_id: impl Into<String>,
        definition: WorkflowDefinition,
        input: Value,
    ) -> Result<TransactionInstance, EngineError> {
        definition.validate()?;
        let transaction_id = transaction_id.into();

        let transaction = self
            .transactions
            .create(TransactionInstance::new(
                transaction_id.clone(),
                definition.clone(),
                input.clone(),
            ))
            .await?;
        self.emit(Event::transaction(&transaction)).await?;
        info!(
            "Transaction '{}' started with workflow {}@{}",
            transaction_id, definition.name, definition.rev
        );

        let workflow = WorkflowInstance::new(&transaction_id, WorkflowType::Workflow, definition, input);
        let workflow_id = workflow.workflow_id;
        if let Err(err) = self.start_workflow(workflow).await {
            error!("Transaction '{}' failed to start: {}", transaction_id, err);
            if let Err(abort_err) = self.abort_start(&transaction_id, workflow_id).await {
                error!("Failed to mark transaction '{}' failed: {}", transaction_id, abort_err);
            }
            return Err(err);
        }
        Ok(transaction)
    }

    /// Marks a transaction whose root workflow could not start as failed.
    async fn abort_start(&self, transaction_id: &str, workflow_id: Uuid) -> Result<(), EngineError> {
        if let Ok(workflow) = self.workflows.get(workflow_id).await {
            if workflow.status == WorkflowStatus::Running {
                self.update_workflow(&WorkflowUpdate::new(&workflow, WorkflowStatus::Failed))
                    .await?;
            }
        }
        self.finish_transaction(TransactionUpdate::new(transaction_id, TransactionStatus::Failed))
            .await
    }

    /// Applies a worker's task update and reacts to the resulting status.
    ///
    /// The update is always treated as a worker update, whatever its
    /// `is_system` flag says.
    pub async fn handle_update(&self, update: &TaskUpdate) -> Result<(), EngineError> {
        let update = TaskUpdate {
            is_system: false,
            ..update.clone()
        };
        let task = self.update_task(&update).await?;

        match task.status {
            TaskStatus::Completed => self.on_task_completed(&task).await,
            TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::AckTimeout => {
                if task.retries > 0 {
                    self.retry_task(&task).await?;
                }
                self.on_task_failed(&task).await
            }
            TaskStatus::Scheduled | TaskStatus::Inprogress => Ok(()),
        }
    }

    /// Advances the owning workflow past a completed task.
    pub fn on_task_completed<'a>(&'a self, task: &'a TaskInstance) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let workflow = self.workflows.get(task.workflow_id).await?;
            if workflow.status != WorkflowStatus::Running {
                debug!(
                    "Ignoring completion of '{}': workflow {} is {}",
                    task.task_reference_name, workflow.workflow_id, workflow.status
                );
                return Ok(());
            }

            let results = task_results(self.tasks.get_all(workflow.workflow_id).await?);
            if let Some(failed) = results.values().find(|t| t.is_exhausted_failure()) {
                debug!(
                    "Task '{}' failed earlier in workflow {}, re-checking failure",
                    failed.task_reference_name, workflow.workflow_id
                );
                let failed = failed.clone();
                return self.on_task_failed(&failed).await;
            }

            let tasks = &workflow.workflow_definition.tasks;
            let path = find_task_path(&task.task_reference_name, tasks, None)
                .ok_or_else(|| EngineError::TaskNotFound(task.task_reference_name.clone()))?;
            let next = get_next_task_path(tasks, &path, &results)?;
            self.close_scopes(&workflow, &next.closed_scopes, &results).await?;

            if next.is_completed {
                return self.complete_workflow(&workflow, &results).await;
            }
            match next.task_path {
                Some(next_path) => self.dispatch_path(&workflow, next_path, &results).await,
                None => {
                    debug!(
                        "Waiting for other lanes of '{}'",
                        next.parent.map(TaskNode::reference_name).unwrap_or_default()
                    );
                    Ok(())
                }
            }
        })
    }

    /// Applies the workflow's failure strategy once a task failed for good and
    /// nothing else in the workflow is still running.
    pub async fn on_task_failed(&self, task: &TaskInstance) -> Result<(), EngineError> {
        if task.retries > 0 {
            return Ok(());
        }

        let all = self.tasks.get_all(task.workflow_id).await?;
        let results = task_results(all.iter().cloned());
        let in_flight = results.values().any(|other| {
            other.task_reference_name != task.task_reference_name
                && !other.task_type.is_container()
                && other.status.is_active()
        });
        if in_flight {
            debug!(
                "Task '{}' failed, waiting for running tasks of workflow {}",
                task.task_reference_name, task.workflow_id
            );
            return Ok(());
        }

        let workflow = self.workflows.get(task.workflow_id).await?;
        if workflow.status != WorkflowStatus::Running {
            return Ok(());
        }
        let workflow = self
            .update_workflow(&WorkflowUpdate::new(&workflow, WorkflowStatus::Failed))
            .await?;
        let strategy = workflow.workflow_definition.failure_strategy;
        warn!(
            "Workflow {} failed at '{}', applying {:?}",
            workflow.workflow_id, task.task_reference_name, strategy
        );

        match strategy {
            FailureStrategy::Failed => {
                self.finish_transaction(TransactionUpdate::new(
                    &workflow.transaction_id,
                    TransactionStatus::Failed,
                ))
                .await
            }
            FailureStrategy::RecoveryWorkflow => {
                let recovery = workflow
                    .workflow_definition
                    .recovery_workflow
                    .as_ref()
                    .ok_or_else(|| EngineError::Validation("Need a recoveryWorkflow".to_string()))?;
                let definition = self.load_definition(recovery).await?;
                let recovery = WorkflowInstance::new(
                    &workflow.transaction_id,
                    WorkflowType::Workflow,
                    definition,
                    results_input(&results)?,
                );
                self.start_workflow(recovery).await.map(drop)
            }
            FailureStrategy::Retry => {
                self.retry_workflow(
                    &workflow.transaction_id,
                    workflow.workflow_definition.clone(),
                    workflow.input.clone(),
                    workflow.retries,
                    TransactionStatus::Failed,
                )
                .await
            }
            FailureStrategy::Compensate => {
                self.compensate(&workflow, &all, &results, WorkflowType::CompensateWorkflow)
                    .await
            }
            FailureStrategy::CompensateThenRetry => {
                self.compensate(
                    &workflow,
                    &all,
                    &results,
                    WorkflowType::CompensateThenRetryWorkflow,
                )
                .await
            }
        }
    }

    /// Schedules the next attempt of a failed task.
    pub async fn retry_task(&self, task: &TaskInstance) -> Result<TaskInstance, EngineError> {
        let attempt = self.create_task(task.next_attempt()).await?;
        info!(
            "Retrying task '{}' ({} retries left)",
            attempt.task_reference_name, attempt.retries
        );
        self.bus.dispatch(&attempt).await?;
        Ok(attempt)
    }

    /// Publishes a `SYSTEM` error event for an update that could not be handled.
    pub async fn report_error(&self, update: &TaskUpdate, err: &EngineError) {
        error!("Failed to process update of task {}: {}", update.task_id, err);
        if let Err(send_err) = self.bus.send_event(&Event::system_error(update, err)).await {
            error!("Failed to report error event: {}", send_err);
        }
    }

    fn start_workflow(&self, workflow: WorkflowInstance) -> EngineFuture<'_, WorkflowInstance> {
        Box::pin(async move {
            let workflow = self.workflows.create(workflow).await?;
            self.emit(Event::workflow(&workflow)).await?;
            info!(
                "Workflow {} ({:?}) started for transaction '{}'",
                workflow.workflow_id, workflow.workflow_type, workflow.transaction_id
            );
            self.dispatch_path(&workflow, TaskPath::root(), &TaskResults::new())
                .await?;
            Ok(workflow)
        })
    }

    /// Creates the task instance for the node at `path` and runs it.
    ///
    /// Worker tasks are sent to the bus. Decisions continue into the branch
    /// picked by their `case` input, parallels into the head of every lane,
    /// and sub-workflow tasks start their child workflow.
    fn dispatch_path<'a>(
        &'a self,
        workflow: &'a WorkflowInstance,
        path: TaskPath,
        results: &'a TaskResults,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let node = path
                .resolve(&workflow.workflow_definition.tasks)
                .ok_or_else(|| EngineError::InvalidPath(path.clone()))?;
            let context = template_context(workflow, results)?;
            let input = map_parameters_to_value(node.input_parameters(), &context);
            let task = self
                .create_task(TaskInstance::from_node(node, workflow, input))
                .await?;

            match node {
                TaskNode::Task(_) | TaskNode::Compensate(_) => {
                    self.bus.dispatch(&task).await?;
                    debug!("Dispatched task '{}' ({})", task.task_reference_name, task.task_id);
                }
                TaskNode::Decision(decision) => {
                    let branch = match decision_case(&task.input)
                        .filter(|case| decision.decisions.contains_key(case))
                    {
                        Some(case) => path.join([
                            PathToken::Label(Label::Decisions),
                            PathToken::Key(case),
                            PathToken::Index(0),
                        ]),
                        None => path.join([
                            PathToken::Label(Label::DefaultDecision),
                            PathToken::Index(0),
                        ]),
                    };
                    debug!("Decision '{}' took branch {}", decision.task_reference_name, branch);
                    self.dispatch_path(workflow, branch, results).await?;
                }
                TaskNode::Parallel(parallel) => {
                    for lane in 0..parallel.parallel_tasks.len() {
                        let head = path.join([
                            PathToken::Label(Label::ParallelTasks),
                            PathToken::Index(lane),
                            PathToken::Index(0),
                        ]);
                        self.dispatch_path(workflow, head, results).await?;
                    }
                }
                TaskNode::SubWorkflow(sub) => {
                    let definition = self.load_definition(&sub.workflow).await?;
                    let child = WorkflowInstance::new(
                        &workflow.transaction_id,
                        WorkflowType::SubWorkflow,
                        definition,
                        task.input.clone(),
                    )
                    .with_child_of(task.task_id);
                    self.start_workflow(child).await?;
                }
            }
            Ok(())
        })
    }

    /// Marks the container instances a navigation step walked out of as completed.
    async fn close_scopes(
        &self,
        workflow: &WorkflowInstance,
        scopes: &[TaskPath],
        results: &TaskResults,
    ) -> Result<(), EngineError> {
        for scope in scopes {
            let node = scope
                .resolve(&workflow.workflow_definition.tasks)
                .ok_or_else(|| EngineError::InvalidPath(scope.clone()))?;
            if let Some(container) = results
                .get(node.reference_name())
                .filter(|instance| instance.status.is_active())
            {
                self.update_task(&TaskUpdate::new(container, TaskStatus::Completed).system())
                    .await?;
            }
        }
        Ok(())
    }

    fn complete_workflow<'a>(
        &'a self,
        workflow: &'a WorkflowInstance,
        results: &'a TaskResults,
    ) -> EngineFuture<'a, ()> {
        Box::pin(async move {
            let context = template_context(workflow, results)?;
            let output =
                map_parameters_to_value(&workflow.workflow_definition.output_parameters, &context);
            let workflow = self
                .update_workflow(
                    &WorkflowUpdate::new(workflow, WorkflowStatus::Completed)
                        .with_output(output.clone()),
                )
                .await?;
            info!(
                "Workflow {} ({:?}) completed",
                workflow.workflow_id, workflow.workflow_type
            );

            match workflow.workflow_type {
                WorkflowType::Workflow => {
                    self.finish_transaction(
                        TransactionUpdate::new(&workflow.transaction_id, TransactionStatus::Completed)
                            .with_output(output),
                    )
                    .await
                }
                WorkflowType::SubWorkflow => {
                    let parent_id = workflow
                        .child_of
                        .ok_or(EngineError::DetachedSubWorkflow(workflow.workflow_id))?;
                    let parent = self.tasks.get(parent_id).await?;
                    let parent = self
                        .update_task(
                            &TaskUpdate::new(&parent, TaskStatus::Completed)
                                .with_output(output)
                                .system(),
                        )
                        .await?;
                    self.on_task_completed(&parent).await
                }
                WorkflowType::CompensateWorkflow => {
                    self.finish_transaction(TransactionUpdate::new(
                        &workflow.transaction_id,
                        TransactionStatus::Compensated,
                    ))
                    .await
                }
                WorkflowType::CompensateThenRetryWorkflow => {
                    self.retry_after_compensation(&workflow.transaction_id, workflow.retries)
                        .await
                }
            }
        })
    }

    /// Starts a compensation workflow for the completed tasks of `workflow`.
    async fn compensate(
        &self,
        workflow: &WorkflowInstance,
        all: &[TaskInstance],
        results: &TaskResults,
        workflow_type: WorkflowType,
    ) -> Result<(), EngineError> {
        let nodes = compensation_tasks(all);
        if nodes.is_empty() {
            debug!("Workflow {} has nothing to compensate", workflow.workflow_id);
            return match workflow_type {
                WorkflowType::CompensateThenRetryWorkflow => {
                    self.retry_after_compensation(&workflow.transaction_id, workflow.retries)
                        .await
                }
                _ => {
                    self.finish_transaction(TransactionUpdate::new(
                        &workflow.transaction_id,
                        TransactionStatus::Compensated,
                    ))
                    .await
                }
            };
        }

        let definition = compensation_definition(&workflow.workflow_definition, nodes);
        let mut compensation = WorkflowInstance::new(
            &workflow.transaction_id,
            workflow_type,
            definition,
            results_input(results)?,
        );
        if workflow_type == WorkflowType::CompensateThenRetryWorkflow {
            compensation = compensation.with_retries(workflow.retries);
        }
        self.start_workflow(compensation).await.map(drop)
    }

    /// Restarts the transaction's workflow while budget remains, otherwise
    /// marks the transaction compensated.
    async fn retry_after_compensation(
        &self,
        transaction_id: &str,
        retries: u32,
    ) -> Result<(), EngineError> {
        if retries == 0 {
            return self
                .finish_transaction(TransactionUpdate::new(
                    transaction_id,
                    TransactionStatus::Compensated,
                ))
                .await;
        }
        let transaction = self.transactions.get(transaction_id).await?;
        self.retry_workflow(
            transaction_id,
            transaction.workflow_definition,
            transaction.input,
            retries,
            TransactionStatus::Compensated,
        )
        .await
    }

    async fn retry_workflow(
        &self,
        transaction_id: &str,
        definition: WorkflowDefinition,
        input: Value,
        retries: u32,
        exhausted: TransactionStatus,
    ) -> Result<(), EngineError> {
        if retries == 0 {
            info!("Transaction '{}' is out of workflow retries", transaction_id);
            return self
                .finish_transaction(TransactionUpdate::new(transaction_id, exhausted))
                .await;
        }
        let workflow = WorkflowInstance::new(transaction_id, WorkflowType::Workflow, definition, input)
            .with_retries(retries - 1);
        self.start_workflow(workflow).await.map(drop)
    }

    async fn load_definition(&self, workflow: &WorkflowRef) -> Result<WorkflowDefinition, EngineError> {
        let definition = self
            .definitions
            .get(workflow)
            .await?
            .ok_or_else(|| EngineError::DefinitionNotFound {
                name: workflow.name.clone(),
                rev: workflow.rev.clone(),
            })?;
        definition.validate()?;
        Ok(definition)
    }

    async fn create_task(&self, task: TaskInstance) -> Result<TaskInstance, EngineError> {
        let task = self.tasks.create(task).await?;
        self.emit(Event::task(&task)).await?;
        Ok(task)
    }

    async fn update_task(&self, update: &TaskUpdate) -> Result<TaskInstance, EngineError> {
        let task = self.tasks.update(update).await?;
        self.emit(Event::task(&task)).await?;
        Ok(task)
    }

    async fn update_workflow(&self, update: &WorkflowUpdate) -> Result<WorkflowInstance, EngineError> {
        let workflow = self.workflows.update(update).await?;
        self.emit(Event::workflow(&workflow)).await?;
        Ok(workflow)
    }

    async fn finish_transaction(&self, update: TransactionUpdate) -> Result<(), EngineError> {
        let transaction = self.transactions.update(&update).await?;
        self.emit(Event::transaction(&transaction)).await?;
        info!(
            "Transaction '{}' is {}",
            transaction.transaction_id, transaction.status
        );
        Ok(())
    }

    async fn emit(&self, event: Event) -> Result<(), EngineError> {
        self.bus.send_event(&event).await?;
        Ok(())
    }
}

/// The `case` input of a decision task as a case label.
fn decision_case(input: &Value) -> Option<String> {
    match input.get("case")? {
        Value::String(case) => Some(case.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Builder for [`Engine`].
#[derive(Default)]
pub struct EngineBuilder {
    tasks: Option<Arc<dyn TaskInstanceStore>>,
    workflows: Option<Arc<dyn WorkflowInstanceStore>>,
    transactions: Option<Arc<dyn TransactionInstanceStore>>,
    definitions: Option<Arc<dyn WorkflowDefinitionStore>>,
    bus: Option<Arc<dyn MessageBus>>,
}

impl EngineBuilder {
    /// Creates a new empty engine builder.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_store(mut self, store: Arc<dyn TaskInstanceStore>) -> Self {
        self.tasks = Some(store);
        self
    }

    pub fn workflow_store(mut self, store: Arc<dyn WorkflowInstanceStore>) -> Self {
        self.workflows = Some(store);
        self
    }

    pub fn transaction_store(mut self, store: Arc<dyn TransactionInstanceStore>) -> Self {
        self.transactions = Some(store);
        self
    }

    pub fn definition_store(mut self, store: Arc<dyn WorkflowDefinitionStore>) -> Self {
        self.definitions = Some(store);
        self
    }

    pub fn message_bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Uses one value for every collaborator.
    pub fn backend<B>(self, backend: Arc<B>) -> Self
    where
        B: TaskInstanceStore
            + WorkflowInstanceStore
            + TransactionInstanceStore
            + WorkflowDefinitionStore
            + MessageBus
            + 'static,
    {
        self.task_store(backend.clone())
            .workflow_store(backend.clone())
            .transaction_store(backend.clone())
            .definition_store(backend.clone())
            .message_bus(backend)
    }

    /// Builds the engine.
    pub fn build(self) -> Result<Engine, EngineError> {
        let missing = |what: &str| EngineError::Validation(format!("{} must be specified", what));
        Ok(Engine {
            tasks: self.tasks.ok_or_else(|| missing("Task store"))?,
            workflows: self.workflows.ok_or_else(|| missing("Workflow store"))?,
            transactions: self.transactions.ok_or_else(|| missing("Transaction store"))?,
            definitions: self.definitions.ok_or_else(|| missing("Definition store"))?,
            bus: self.bus.ok_or_else(|| missing("Message bus"))?,
        })
    }
}
