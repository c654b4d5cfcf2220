//! Builds the synthetic workflow that undoes a failed workflow's tasks.

use crate::definition::{FailureStrategy, Parameters, TaskNode, TaskType, WorkflowDefinition};
use crate::instance::{TaskInstance, TaskStatus};

/// Revision suffix of generated compensation definitions.
pub const COMPENSATE_REV_SUFFIX: &str = "_compensate";

/// One `COMPENSATE` node per completed worker task, most recently finished first.
///
/// Each node receives the original task's input and output through
/// `${workflow.input.<ref>.input}` and `${workflow.input.<ref>.output}`, so the
/// compensation workflow must be started with
/// [`results_input`](crate::results_input) as its input.
pub fn compensation_tasks(tasks: &[TaskInstance]) -> Vec<TaskNode> {
    let mut completed: Vec<&TaskInstance> = tasks
        .iter()
        .rev()
        .filter(|task| task.task_type == TaskType::Task && task.status == TaskStatus::Completed)
        .collect();
    completed.sort_by(|a, b| b.end_time.cmp(&a.end_time));

    completed
        .into_iter()
        .map(|task| {
            let reference = &task.task_reference_name;
            TaskNode::compensate(task.task_name.clone(), reference.clone())
                .with_input("input", format!("${{workflow.input.{}.input}}", reference))
                .with_input("output", format!("${{workflow.input.{}.output}}", reference))
        })
        .collect()
}

/// Definition running `tasks` on behalf of `original`.
pub fn compensation_definition(original: &WorkflowDefinition, tasks: Vec<TaskNode>) -> WorkflowDefinition {
    WorkflowDefinition {
        name: original.name.clone(),
        rev: format!("{}{}", original.rev, COMPENSATE_REV_SUFFIX),
        description: None,
        tasks,
        failure_strategy: FailureStrategy::Failed,
        retry: None,
        recovery_workflow: None,
        output_parameters: Parameters::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{results_input, task_results, WorkflowInstance, WorkflowType};
    use crate::map_parameters_to_value;
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};

    fn workflow() -> WorkflowInstance {
        let definition = WorkflowDefinition::builder("ORDER", "3")
            .task(TaskNode::task("reserve", "t1"))
            .task(TaskNode::task("charge", "t2"))
            .task(TaskNode::task("ship", "t3"))
            .failure_strategy(FailureStrategy::Compensate)
            .build()
            .expect("valid definition");
        WorkflowInstance::new("tx-1", WorkflowType::Workflow, definition, Value::Null)
    }

    fn task(workflow: &WorkflowInstance, index: usize, status: TaskStatus, ended_secs: i64) -> TaskInstance {
        let node = &workflow.workflow_definition.tasks[index];
        let mut task = TaskInstance::from_node(node, workflow, json!({"n": index}));
        task.status = status;
        task.output = json!({"done": index});
        task.end_time = Some(Utc::now() + Duration::seconds(ended_secs));
        task
    }

    #[test]
    fn test_compensation_tasks_newest_first() {
        let workflow = workflow();
        let tasks = vec![
            task(&workflow, 0, TaskStatus::Completed, 1),
            task(&workflow, 1, TaskStatus::Completed, 2),
            task(&workflow, 2, TaskStatus::Failed, 3),
        ];

        let nodes = compensation_tasks(&tasks);
        let references: Vec<_> = nodes.iter().map(TaskNode::reference_name).collect();
        assert_eq!(references, vec!["t2", "t1"]);
        assert!(nodes.iter().all(|node| node.task_type() == TaskType::Compensate));
        assert_eq!(nodes[0].name(), "charge");
        assert_eq!(
            nodes[0].input_parameters().get("output"),
            Some(&json!("${workflow.input.t2.output}"))
        );
    }

    #[test]
    fn test_compensation_skips_system_tasks() {
        let workflow = workflow();
        let mut system = task(&workflow, 0, TaskStatus::Completed, 1);
        system.task_type = TaskType::Parallel;
        assert!(compensation_tasks(&[system]).is_empty());
    }

    #[test]
    fn test_compensation_definition() {
        let workflow = workflow();
        let nodes = compensation_tasks(&[task(&workflow, 0, TaskStatus::Completed, 1)]);
        let definition = compensation_definition(&workflow.workflow_definition, nodes);

        assert_eq!(definition.name, "ORDER");
        assert_eq!(definition.rev, "3_compensate");
        assert_eq!(definition.failure_strategy, FailureStrategy::Failed);
        assert!(definition.output_parameters.is_empty());
        assert!(definition.validate().is_ok());
    }

    #[test]
    fn test_compensation_templates_resolve_against_results_input() {
        let workflow = workflow();
        let tasks = vec![task(&workflow, 0, TaskStatus::Completed, 1)];
        let nodes = compensation_tasks(&tasks);
        let input = results_input(&task_results(tasks)).expect("serializable");

        let context = json!({"workflow": {"input": input}});
        let mapped = map_parameters_to_value(nodes[0].input_parameters(), &context);
        assert_eq!(mapped, json!({"input": {"n": 0}, "output": {"done": 0}}));
    }
}
