//! Runtime records for transactions, workflows and tasks, and the status
//! rules stores enforce when updating them.

use crate::definition::{TaskNode, TaskType, WorkflowDefinition};
use crate::error::{RecordKind, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Latest attempt of each task in a workflow, keyed by reference name.
pub type TaskResults = HashMap<String, TaskInstance>;

/// Status of a task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Scheduled,
    Inprogress,
    Completed,
    Failed,
    Timeout,
    AckTimeout,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Scheduled => "SCHEDULED",
            TaskStatus::Inprogress => "INPROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Timeout => "TIMEOUT",
            TaskStatus::AckTimeout => "ACK_TIMEOUT",
        }
    }

    /// Still waiting on a worker or on child tasks.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Scheduled | TaskStatus::Inprogress)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }

    /// Terminal statuses that count as a failed attempt.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::AckTimeout
        )
    }

    /// Statuses a task must currently hold to move to `self`.
    ///
    /// System updates (issued by the engine itself) may skip the worker
    /// acknowledgement and close a task straight from `Scheduled`.
    pub fn predecessors(self, is_system: bool) -> &'static [TaskStatus] {
        match (self, is_system) {
            (TaskStatus::Scheduled, _) => &[],
            (TaskStatus::Inprogress, _) => &[TaskStatus::Scheduled],
            (TaskStatus::Completed | TaskStatus::Failed, false) => &[TaskStatus::Inprogress],
            (TaskStatus::Completed | TaskStatus::Failed, true) => {
                &[TaskStatus::Scheduled, TaskStatus::Inprogress]
            }
            (TaskStatus::Timeout, _) => &[TaskStatus::Scheduled, TaskStatus::Inprogress],
            (TaskStatus::AckTimeout, _) => &[TaskStatus::Scheduled],
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a workflow instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Running => "RUNNING",
            WorkflowStatus::Completed => "COMPLETED",
            WorkflowStatus::Failed => "FAILED",
            WorkflowStatus::Timeout => "TIMEOUT",
            WorkflowStatus::Cancelled => "CANCELLED",
        }
    }

    /// Every terminal status is only reachable from `Running`.
    pub fn predecessors(self) -> &'static [WorkflowStatus] {
        match self {
            WorkflowStatus::Running => &[],
            _ => &[WorkflowStatus::Running],
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
    Compensated,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Running => "RUNNING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Compensated => "COMPENSATED",
        }
    }

    /// Allowed next statuses.
    pub fn next_states(self) -> &'static [TransactionStatus] {
        match self {
            TransactionStatus::Running => &[
                TransactionStatus::Completed,
                TransactionStatus::Failed,
                TransactionStatus::Cancelled,
                TransactionStatus::Compensated,
            ],
            _ => &[],
        }
    }

    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        self.next_states().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self != TransactionStatus::Running
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a workflow instance was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowType {
    /// The transaction's own workflow (including retries and recoveries).
    Workflow,
    /// Spawned by a `SUB_WORKFLOW` task.
    SubWorkflow,
    /// Undoes completed tasks, then compensates the transaction.
    CompensateWorkflow,
    /// Undoes completed tasks, then retries while budget remains.
    CompensateThenRetryWorkflow,
}

fn status_list<T: fmt::Display>(statuses: &[T]) -> String {
    statuses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// One execution of a single task node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskInstance {
    pub task_id: Uuid,
    pub task_name: String,
    pub task_reference_name: String,
    pub workflow_id: Uuid,
    pub transaction_id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Attempts left after this one.
    pub retries: u32,
    /// Milliseconds a worker should wait before a retried attempt.
    pub retry_delay: u64,
    /// Milliseconds allowed between dispatch and acknowledgement.
    pub ack_timeout: u64,
    /// Milliseconds allowed between acknowledgement and completion.
    pub timeout: u64,
    pub is_retried: bool,
    pub input: Value,
    pub output: Value,
    #[serde(default)]
    pub logs: Vec<Value>,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl TaskInstance {
    /// Creates the first attempt of `node` inside `workflow`.
    ///
    /// Worker tasks start `Scheduled`; system tasks start `Inprogress` since the
    /// engine runs them immediately.
    pub fn from_node(node: &TaskNode, workflow: &WorkflowInstance, input: Value) -> Self {
        let now = Utc::now();
        let task_type = node.task_type();
        let (status, start_time) = if task_type.is_worker_task() {
            (TaskStatus::Scheduled, None)
        } else {
            (TaskStatus::Inprogress, Some(now))
        };
        let retry = node.retry();
        let (ack_timeout, timeout) = node.timeouts().unwrap_or_default();

        Self {
            task_id: Uuid::new_v4(),
            task_name: node.name().to_string(),
            task_reference_name: node.reference_name().to_string(),
            workflow_id: workflow.workflow_id,
            transaction_id: workflow.transaction_id.clone(),
            task_type,
            status,
            retries: retry.map_or(0, |r| r.limit),
            retry_delay: retry.map_or(0, |r| r.delay),
            ack_timeout,
            timeout,
            is_retried: false,
            input,
            output: Value::Null,
            logs: Vec::new(),
            create_time: now,
            start_time,
            end_time: None,
        }
    }

    /// Next attempt of a failed task, with one retry used up.
    pub fn next_attempt(&self) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            status: TaskStatus::Scheduled,
            retries: self.retries.saturating_sub(1),
            is_retried: true,
            output: Value::Null,
            logs: Vec::new(),
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            ..self.clone()
        }
    }

    /// True once the task failed with no retries left.
    pub fn is_exhausted_failure(&self) -> bool {
        self.status.is_failure() && self.retries == 0
    }

    /// Applies `update` after checking the predecessor status.
    pub fn apply_update(&mut self, update: &TaskUpdate) -> Result<(), StoreError> {
        let expected = update.status.predecessors(update.is_system);
        if !expected.contains(&self.status) {
            return Err(StoreError::StatusMismatch {
                kind: RecordKind::Task,
                id: self.task_id.to_string(),
                actual: self.status.to_string(),
                requested: update.status.to_string(),
                expected: status_list(expected),
            });
        }

        let now = Utc::now();
        self.status = update.status;
        if let Some(output) = &update.output {
            self.output = output.clone();
        }
        self.logs.extend(update.logs.iter().cloned());
        if update.status == TaskStatus::Inprogress {
            self.start_time = Some(now);
        }
        if update.status.is_terminal() {
            self.end_time = Some(now);
        }
        Ok(())
    }
}

/// One execution of a workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub workflow_id: Uuid,
    pub transaction_id: String,
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    pub status: WorkflowStatus,
    /// Workflow-level retry budget left.
    pub retries: u32,
    pub input: Value,
    pub output: Value,
    /// Snapshot of the definition taken when the instance was created.
    pub workflow_definition: WorkflowDefinition,
    /// The `SUB_WORKFLOW` task instance that spawned this workflow.
    pub child_of: Option<Uuid>,
    pub create_time: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl WorkflowInstance {
    pub fn new(
        transaction_id: impl Into<String>,
        workflow_type: WorkflowType,
        workflow_definition: WorkflowDefinition,
        input: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: Uuid::new_v4(),
            transaction_id: transaction_id.into(),
            workflow_type,
            status: WorkflowStatus::Running,
            retries: workflow_definition.retry_limit(),
            input,
            output: Value::Null,
            workflow_definition,
            child_of: None,
            create_time: now,
            start_time: now,
            end_time: None,
        }
    }

    /// Overrides the retry budget taken from the definition.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_child_of(mut self, task_id: Uuid) -> Self {
        self.child_of = Some(task_id);
        self
    }

    pub fn apply_update(&mut self, update: &WorkflowUpdate) -> Result<(), StoreError> {
        let expected = update.status.predecessors();
        if !expected.contains(&self.status) {
            return Err(StoreError::StatusMismatch {
                kind: RecordKind::Workflow,
                id: self.workflow_id.to_string(),
                actual: self.status.to_string(),
                requested: update.status.to_string(),
                expected: status_list(expected),
            });
        }
        self.status = update.status;
        if let Some(output) = &update.output {
            self.output = output.clone();
        }
        self.end_time = Some(Utc::now());
        Ok(())
    }
}

/// A caller-initiated unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInstance {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub input: Value,
    pub output: Value,
    /// Definition retries and compensate-then-retry restart from.
    pub workflow_definition: WorkflowDefinition,
    pub create_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl TransactionInstance {
    pub fn new(
        transaction_id: impl Into<String>,
        workflow_definition: WorkflowDefinition,
        input: Value,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            status: TransactionStatus::Running,
            input,
            output: Value::Null,
            workflow_definition,
            create_time: Utc::now(),
            end_time: None,
        }
    }

    pub fn apply_update(&mut self, update: &TransactionUpdate) -> Result<(), StoreError> {
        if !self.status.can_transition_to(update.status) {
            return Err(StoreError::InvalidTransition {
                id: self.transaction_id.clone(),
                from: self.status.to_string(),
                to: update.status.to_string(),
            });
        }
        self.status = update.status;
        if let Some(output) = &update.output {
            self.output = output.clone();
        }
        if update.status.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        Ok(())
    }
}

/// Status change reported for a task, by a worker or by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub transaction_id: String,
    pub workflow_id: Uuid,
    pub task_id: Uuid,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default)]
    pub logs: Vec<Value>,
    /// Engine-issued updates relax the predecessor check.
    #[serde(default)]
    pub is_system: bool,
}

impl TaskUpdate {
    /// Worker update for `task`.
    pub fn new(task: &TaskInstance, status: TaskStatus) -> Self {
        Self {
            transaction_id: task.transaction_id.clone(),
            workflow_id: task.workflow_id,
            task_id: task.task_id,
            status,
            output: None,
            logs: Vec::new(),
            is_system: false,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_log(mut self, log: Value) -> Self {
        self.logs.push(log);
        self
    }

    /// Marks the update as issued by the engine.
    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowUpdate {
    pub transaction_id: String,
    pub workflow_id: Uuid,
    pub status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl WorkflowUpdate {
    pub fn new(workflow: &WorkflowInstance, status: WorkflowStatus) -> Self {
        Self {
            transaction_id: workflow.transaction_id.clone(),
            workflow_id: workflow.workflow_id,
            status,
            output: None,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionUpdate {
    pub transaction_id: String,
    pub status: TransactionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
}

impl TransactionUpdate {
    pub fn new(transaction_id: impl Into<String>, status: TransactionStatus) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            status,
            output: None,
        }
    }

    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }
}

/// Collapses a workflow's task instances into [`TaskResults`].
///
/// `tasks` must be in creation order; a later attempt replaces an earlier one.
pub fn task_results<I>(tasks: I) -> TaskResults
where
    I: IntoIterator<Item = TaskInstance>,
{
    tasks
        .into_iter()
        .map(|task| (task.task_reference_name.clone(), task))
        .collect()
}

/// Builds the object parameter templates are resolved against: every task
/// result under its reference name plus the workflow under `workflow`.
pub fn template_context(
    workflow: &WorkflowInstance,
    results: &TaskResults,
) -> Result<Value, serde_json::Error> {
    let mut context = results_map(results)?;
    context.insert("workflow".to_string(), serde_json::to_value(workflow)?);
    Ok(Value::Object(context))
}

/// Task results as a JSON object keyed by reference name.
///
/// Recovery and compensation workflows are started with this as their input.
pub fn results_input(results: &TaskResults) -> Result<Value, serde_json::Error> {
    results_map(results).map(Value::Object)
}

fn results_map(results: &TaskResults) -> Result<serde_json::Map<String, Value>, serde_json::Error> {
    results
        .iter()
        .map(|(reference, task)| Ok((reference.clone(), serde_json::to_value(task)?)))
        .collect()
}
