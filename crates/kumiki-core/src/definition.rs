//! Workflow definitions and the task tree they carry.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

/// Input or output parameter template map.
///
/// Top-level string values of the form `${a.b.c}` are resolved against task
/// results at dispatch time, see [`map_parameters_to_value`](crate::map_parameters_to_value).
pub type Parameters = serde_json::Map<String, Value>;

/// Name and revision of a registered workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRef {
    pub name: String,
    pub rev: String,
}

impl WorkflowRef {
    pub fn new(name: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rev: rev.into(),
        }
    }
}

/// Per-task retry budget handed to workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRetry {
    /// How many more attempts a failed task gets.
    pub limit: u32,
    /// Delay before each retry, in milliseconds.
    pub delay: u64,
}

/// A task executed by an external worker (also used for compensations).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub name: String,
    pub task_reference_name: String,
    #[serde(default)]
    pub input_parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<TaskRetry>,
    /// Milliseconds a worker has to acknowledge the task.
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout: u64,
    /// Milliseconds a worker has to finish the task once acknowledged.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

fn default_ack_timeout() -> u64 {
    DEFAULT_ACK_TIMEOUT_MS
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl TaskDefinition {
    fn new(name: String, task_reference_name: String) -> Self {
        Self {
            name,
            task_reference_name,
            input_parameters: Parameters::new(),
            retry: None,
            ack_timeout: DEFAULT_ACK_TIMEOUT_MS,
            timeout: DEFAULT_TIMEOUT_MS,
        }
    }
}

/// Branches on the `case` input parameter.
///
/// Case labels are kept in a sorted map, so searches visit them in
/// lexicographic order before falling back to `default_decision`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionTask {
    pub task_reference_name: String,
    #[serde(default)]
    pub input_parameters: Parameters,
    pub decisions: BTreeMap<String, Vec<TaskNode>>,
    pub default_decision: Vec<TaskNode>,
}

/// Runs every lane concurrently and joins on the last task of each lane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParallelTask {
    pub task_reference_name: String,
    #[serde(default)]
    pub input_parameters: Parameters,
    pub parallel_tasks: Vec<Vec<TaskNode>>,
}

/// Runs another registered workflow as a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubWorkflowTask {
    pub task_reference_name: String,
    #[serde(default)]
    pub input_parameters: Parameters,
    pub workflow: WorkflowRef,
}

/// Discriminator shared by definition nodes and task instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Task,
    Compensate,
    Decision,
    Parallel,
    SubWorkflow,
}

impl TaskType {
    /// Decision and parallel nodes only group other nodes.
    pub fn is_container(self) -> bool {
        matches!(self, TaskType::Decision | TaskType::Parallel)
    }

    /// Nodes that are handed to an external worker through the bus.
    pub fn is_worker_task(self) -> bool {
        matches!(self, TaskType::Task | TaskType::Compensate)
    }
}

/// One node of a workflow task tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskNode {
    Task(TaskDefinition),
    Compensate(TaskDefinition),
    Decision(DecisionTask),
    Parallel(ParallelTask),
    SubWorkflow(SubWorkflowTask),
}

impl TaskNode {
    /// Creates a worker task whose name and reference name differ.
    pub fn task(name: impl Into<String>, task_reference_name: impl Into<String>) -> Self {
        TaskNode::Task(TaskDefinition::new(name.into(), task_reference_name.into()))
    }

    /// Creates a compensation task.
    pub fn compensate(name: impl Into<String>, task_reference_name: impl Into<String>) -> Self {
        TaskNode::Compensate(TaskDefinition::new(name.into(), task_reference_name.into()))
    }

    /// Creates a decision node from `(case label, branch)` pairs and a default branch.
    pub fn decision<K, I>(
        task_reference_name: impl Into<String>,
        decisions: I,
        default_decision: Vec<TaskNode>,
    ) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Vec<TaskNode>)>,
    {
        TaskNode::Decision(DecisionTask {
            task_reference_name: task_reference_name.into(),
            input_parameters: Parameters::new(),
            decisions: decisions
                .into_iter()
                .map(|(case, branch)| (case.into(), branch))
                .collect(),
            default_decision,
        })
    }

    /// Creates a parallel node from its lanes.
    pub fn parallel(task_reference_name: impl Into<String>, lanes: Vec<Vec<TaskNode>>) -> Self {
        TaskNode::Parallel(ParallelTask {
            task_reference_name: task_reference_name.into(),
            input_parameters: Parameters::new(),
            parallel_tasks: lanes,
        })
    }

    /// Creates a sub-workflow node.
    pub fn sub_workflow(task_reference_name: impl Into<String>, workflow: WorkflowRef) -> Self {
        TaskNode::SubWorkflow(SubWorkflowTask {
            task_reference_name: task_reference_name.into(),
            input_parameters: Parameters::new(),
            workflow,
        })
    }

    /// Adds one input parameter template.
    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input_parameters_mut().insert(key.into(), value.into());
        self
    }

    /// Sets the per-task retry budget. Ignored for nodes not run by workers.
    pub fn with_retry(mut self, limit: u32, delay: u64) -> Self {
        if let TaskNode::Task(task) | TaskNode::Compensate(task) = &mut self {
            task.retry = Some(TaskRetry { limit, delay });
        }
        self
    }

    /// Sets the acknowledge and run deadlines in milliseconds. Ignored for
    /// nodes not run by workers.
    pub fn with_timeouts(mut self, ack_timeout: u64, timeout: u64) -> Self {
        if let TaskNode::Task(task) | TaskNode::Compensate(task) = &mut self {
            task.ack_timeout = ack_timeout;
            task.timeout = timeout;
        }
        self
    }

    pub fn reference_name(&self) -> &str {
        match self {
            TaskNode::Task(t) | TaskNode::Compensate(t) => &t.task_reference_name,
            TaskNode::Decision(d) => &d.task_reference_name,
            TaskNode::Parallel(p) => &p.task_reference_name,
            TaskNode::SubWorkflow(s) => &s.task_reference_name,
        }
    }

    /// The worker-facing task name; system nodes use their reference name.
    pub fn name(&self) -> &str {
        match self {
            TaskNode::Task(t) | TaskNode::Compensate(t) => &t.name,
            other => other.reference_name(),
        }
    }

    pub fn task_type(&self) -> TaskType {
        match self {
            TaskNode::Task(_) => TaskType::Task,
            TaskNode::Compensate(_) => TaskType::Compensate,
            TaskNode::Decision(_) => TaskType::Decision,
            TaskNode::Parallel(_) => TaskType::Parallel,
            TaskNode::SubWorkflow(_) => TaskType::SubWorkflow,
        }
    }

    pub fn input_parameters(&self) -> &Parameters {
        match self {
            TaskNode::Task(t) | TaskNode::Compensate(t) => &t.input_parameters,
            TaskNode::Decision(d) => &d.input_parameters,
            TaskNode::Parallel(p) => &p.input_parameters,
            TaskNode::SubWorkflow(s) => &s.input_parameters,
        }
    }

    fn input_parameters_mut(&mut self) -> &mut Parameters {
        match self {
            TaskNode::Task(t) | TaskNode::Compensate(t) => &mut t.input_parameters,
            TaskNode::Decision(d) => &mut d.input_parameters,
            TaskNode::Parallel(p) => &mut p.input_parameters,
            TaskNode::SubWorkflow(s) => &mut s.input_parameters,
        }
    }

    /// `(ack_timeout, timeout)` of worker tasks.
    pub fn timeouts(&self) -> Option<(u64, u64)> {
        match self {
            TaskNode::Task(t) | TaskNode::Compensate(t) => Some((t.ack_timeout, t.timeout)),
            _ => None,
        }
    }

    pub fn retry(&self) -> Option<&TaskRetry> {
        match self {
            TaskNode::Task(t) | TaskNode::Compensate(t) => t.retry.as_ref(),
            _ => None,
        }
    }
}

/// What happens to a transaction once one of its workflow instances fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureStrategy {
    /// Fail the transaction.
    #[default]
    Failed,
    /// Start the configured recovery workflow with the completed task results.
    RecoveryWorkflow,
    /// Start a fresh instance while the retry budget lasts.
    Retry,
    /// Undo completed tasks, newest first, then mark the transaction compensated.
    Compensate,
    /// Undo completed tasks, then start a fresh instance while the budget lasts.
    CompensateThenRetry,
}

/// Workflow-level retry budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRetry {
    pub limit: u32,
    pub delay_second: u64,
}

/// A versioned workflow definition.
///
/// Definitions are copied into every workflow instance, so editing a
/// registered definition never affects instances that are already running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub name: String,
    pub rev: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tasks: Vec<TaskNode>,
    #[serde(default)]
    pub failure_strategy: FailureStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<WorkflowRetry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery_workflow: Option<WorkflowRef>,
    #[serde(default)]
    pub output_parameters: Parameters,
}

impl WorkflowDefinition {
    /// Creates a new definition builder.
    pub fn builder(name: impl Into<String>, rev: impl Into<String>) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder::new(name, rev)
    }

    pub fn workflow_ref(&self) -> WorkflowRef {
        WorkflowRef::new(self.name.clone(), self.rev.clone())
    }

    /// Workflow-level retry budget a fresh instance starts with.
    pub fn retry_limit(&self) -> u32 {
        self.retry.as_ref().map_or(0, |retry| retry.limit)
    }

    /// Checks the definition before it can be registered or started.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Validation`] if:
    /// - the task list is empty
    /// - the `Retry` strategy has no retry config
    /// - the `RecoveryWorkflow` strategy names no recovery workflow
    /// - a reference name occurs more than once anywhere in the tree
    /// - a parallel node has no lanes, or a lane or decision branch is empty
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.tasks.is_empty() {
            return Err(EngineError::Validation("Task cannot be empty".to_string()));
        }
        if self.failure_strategy == FailureStrategy::Retry && self.retry.is_none() {
            return Err(EngineError::Validation("Need a retry config".to_string()));
        }
        if self.failure_strategy == FailureStrategy::RecoveryWorkflow
            && self.recovery_workflow.is_none()
        {
            return Err(EngineError::Validation(
                "Need a recoveryWorkflow".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        validate_nodes(&self.tasks, &mut seen)
    }
}

fn validate_nodes<'a>(
    nodes: &'a [TaskNode],
    seen: &mut HashSet<&'a str>,
) -> Result<(), EngineError> {
    for node in nodes {
        if !seen.insert(node.reference_name()) {
            return Err(EngineError::Validation(format!(
                "Duplicate task reference name: {}",
                node.reference_name()
            )));
        }
        match node {
            TaskNode::Decision(decision) => {
                for (case, branch) in &decision.decisions {
                    if branch.is_empty() {
                        return Err(EngineError::Validation(format!(
                            "Decision {} has an empty case: {}",
                            decision.task_reference_name, case
                        )));
                    }
                    validate_nodes(branch, seen)?;
                }
                if decision.default_decision.is_empty() {
                    return Err(EngineError::Validation(format!(
                        "Decision {} has an empty defaultDecision",
                        decision.task_reference_name
                    )));
                }
                validate_nodes(&decision.default_decision, seen)?;
            }
            TaskNode::Parallel(parallel) => {
                if parallel.parallel_tasks.is_empty()
                    || parallel.parallel_tasks.iter().any(Vec::is_empty)
                {
                    return Err(EngineError::Validation(format!(
                        "Parallel {} needs at least one non-empty lane",
                        parallel.task_reference_name
                    )));
                }
                for lane in &parallel.parallel_tasks {
                    validate_nodes(lane, seen)?;
                }
            }
            TaskNode::Task(_) | TaskNode::Compensate(_) | TaskNode::SubWorkflow(_) => {}
        }
    }
    Ok(())
}

/// Builder for [`WorkflowDefinition`].
#[derive(Debug)]
pub struct WorkflowDefinitionBuilder {
    definition: WorkflowDefinition,
}

impl WorkflowDefinitionBuilder {
    pub fn new(name: impl Into<String>, rev: impl Into<String>) -> Self {
        Self {
            definition: WorkflowDefinition {
                name: name.into(),
                rev: rev.into(),
                description: None,
                tasks: Vec::new(),
                failure_strategy: FailureStrategy::Failed,
                retry: None,
                recovery_workflow: None,
                output_parameters: Parameters::new(),
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.definition.description = Some(description.into());
        self
    }

    /// Appends a top-level task.
    pub fn task(mut self, node: TaskNode) -> Self {
        self.definition.tasks.push(node);
        self
    }

    pub fn failure_strategy(mut self, strategy: FailureStrategy) -> Self {
        self.definition.failure_strategy = strategy;
        self
    }

    pub fn retry(mut self, limit: u32, delay_second: u64) -> Self {
        self.definition.retry = Some(WorkflowRetry {
            limit,
            delay_second,
        });
        self
    }

    pub fn recovery_workflow(mut self, workflow: WorkflowRef) -> Self {
        self.definition.recovery_workflow = Some(workflow);
        self
    }

    /// Adds one output parameter template.
    pub fn output(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.definition
            .output_parameters
            .insert(key.into(), value.into());
        self
    }

    /// Validates and returns the definition.
    pub fn build(self) -> Result<WorkflowDefinition, EngineError> {
        self.definition.validate()?;
        Ok(self.definition)
    }
}
