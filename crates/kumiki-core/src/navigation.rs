//! Computes where a workflow goes after one of its tasks completes.

use crate::definition::TaskNode;
use crate::error::EngineError;
use crate::instance::{TaskResults, TaskStatus};
use crate::path::TaskPath;

/// Result of [`get_next_task_path`].
#[derive(Debug, Clone, PartialEq)]
pub struct NextTaskPath<'a> {
    /// The whole task tree is done.
    pub is_completed: bool,
    /// Node to dispatch next. `None` when completed or waiting on a parallel barrier.
    pub task_path: Option<TaskPath>,
    /// Container node directly enclosing the completed task, if any.
    pub parent: Option<&'a TaskNode>,
    /// The completed task was the last one `parent` needed.
    pub is_last_child: bool,
    /// Container paths the step walked out of, innermost first.
    pub closed_scopes: Vec<TaskPath>,
}

impl<'a> NextTaskPath<'a> {
    fn completed() -> Self {
        Self {
            is_completed: true,
            task_path: None,
            parent: None,
            is_last_child: false,
            closed_scopes: Vec::new(),
        }
    }

    fn next(path: TaskPath, parent: Option<&'a TaskNode>) -> Self {
        Self {
            is_completed: false,
            task_path: Some(path),
            parent,
            is_last_child: false,
            closed_scopes: Vec::new(),
        }
    }

    fn wait(parent: Option<&'a TaskNode>) -> Self {
        Self {
            is_completed: false,
            task_path: None,
            parent,
            is_last_child: false,
            closed_scopes: Vec::new(),
        }
    }

    /// True when the caller has nothing to dispatch and nothing to finish.
    pub fn is_waiting(&self) -> bool {
        !self.is_completed && self.task_path.is_none()
    }
}

/// True iff every entry is present and `Completed`.
pub fn is_all_completed<I>(statuses: I) -> bool
where
    I: IntoIterator<Item = Option<TaskStatus>>,
{
    statuses
        .into_iter()
        .all(|status| status == Some(TaskStatus::Completed))
}

/// Decides what follows the completed task at `current`.
///
/// Rules apply in order: the last top-level task completes the tree; a task
/// in a parallel lane moves down its lane or, at the lane's end, waits until
/// the last task of every lane is `Completed`; a task in a decision branch
/// moves down its branch or leaves the decision; any other task moves to its
/// next sibling.
///
/// # Errors
///
/// Returns [`EngineError::InvalidPath`] if `current` matches none of the rules.
pub fn get_next_task_path<'a>(
    tasks: &'a [TaskNode],
    current: &TaskPath,
    results: &TaskResults,
) -> Result<NextTaskPath<'a>, EngineError> {
    if current.is_last_top_level_task(tasks) {
        return Ok(NextTaskPath::completed());
    }

    let sibling = current
        .next_sibling()
        .filter(|path| path.resolve(tasks).is_some());

    if current.is_inside_parallel_lane(tasks) {
        let container = current.ancestor(3);
        let parent = container.resolve(tasks);
        if let Some(next) = sibling {
            return Ok(NextTaskPath::next(next, parent));
        }

        // `current` counts as completed even when it is a container whose
        // instance is only closed after this step.
        let finished = current.resolve(tasks).map(TaskNode::reference_name);
        let lanes_done = match parent {
            Some(TaskNode::Parallel(parallel)) => {
                is_all_completed(parallel.parallel_tasks.iter().map(|lane| {
                    let last = lane.last()?;
                    if Some(last.reference_name()) == finished {
                        return Some(TaskStatus::Completed);
                    }
                    results.get(last.reference_name()).map(|task| task.status)
                }))
            }
            _ => return Err(EngineError::InvalidPath(current.clone())),
        };
        if lanes_done {
            return leave_scope(tasks, container, parent, results);
        }
        return Ok(NextTaskPath::wait(parent));
    }

    let decision_scope = if current.is_inside_decision_default(tasks) {
        Some(current.ancestor(2))
    } else if current.is_inside_decision_case(tasks) {
        Some(current.ancestor(3))
    } else {
        None
    };
    if let Some(container) = decision_scope {
        let parent = container.resolve(tasks);
        return match sibling {
            Some(next) => Ok(NextTaskPath::next(next, parent)),
            None => leave_scope(tasks, container, parent, results),
        };
    }

    match sibling {
        Some(next) => Ok(NextTaskPath::next(next, None)),
        None => Err(EngineError::InvalidPath(current.clone())),
    }
}

/// Treats the container at `container` as a single completed task.
fn leave_scope<'a>(
    tasks: &'a [TaskNode],
    container: TaskPath,
    parent: Option<&'a TaskNode>,
    results: &TaskResults,
) -> Result<NextTaskPath<'a>, EngineError> {
    let mut next = get_next_task_path(tasks, &container, results)?;
    next.parent = parent;
    next.is_last_child = true;
    next.closed_scopes.insert(0, container);
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::WorkflowDefinition;
    use crate::instance::{TaskInstance, WorkflowInstance, WorkflowType};
    use crate::task_path;
    use serde_json::Value;

    fn t(reference: &str) -> TaskNode {
        TaskNode::task("name", reference)
    }

    fn example_tasks() -> Vec<TaskNode> {
        vec![
            t("t1"),
            TaskNode::decision(
                "t2",
                [
                    ("case1", vec![t("t3"), t("t4")]),
                    ("case2", vec![t("t5"), t("t6")]),
                ],
                vec![
                    t("t7"),
                    t("t8"),
                    TaskNode::parallel("t9", vec![vec![t("t10")], vec![t("t11")]]),
                ],
            ),
            TaskNode::parallel("t12", vec![vec![t("t13")], vec![t("t14")]]),
        ]
    }

    /// Task results with the given statuses, resolved against `tasks`.
    fn results(tasks: &[TaskNode], entries: &[(&str, TaskStatus)]) -> TaskResults {
        let definition = WorkflowDefinition {
            name: "w".to_string(),
            rev: "1".to_string(),
            description: None,
            tasks: tasks.to_vec(),
            failure_strategy: Default::default(),
            retry: None,
            recovery_workflow: None,
            output_parameters: Default::default(),
        };
        let workflow = WorkflowInstance::new("tx", WorkflowType::Workflow, definition, Value::Null);
        entries
            .iter()
            .map(|(reference, status)| {
                let mut task = TaskInstance::from_node(&t(reference), &workflow, Value::Null);
                task.status = *status;
                (reference.to_string(), task)
            })
            .collect()
    }

    fn completed(tasks: &[TaskNode], references: &[&str]) -> TaskResults {
        let entries: Vec<_> = references
            .iter()
            .map(|reference| (*reference, TaskStatus::Completed))
            .collect();
        results(tasks, &entries)
    }

    fn parent_ref<'a>(next: &NextTaskPath<'a>) -> Option<&'a str> {
        next.parent.map(TaskNode::reference_name)
    }

    #[test]
    fn test_is_all_completed() {
        use TaskStatus::*;
        assert!(is_all_completed(vec![Some(Completed), Some(Completed), Some(Completed)]));
        assert!(!is_all_completed(vec![Some(Completed), Some(Failed), Some(Completed)]));
        assert!(!is_all_completed(vec![Some(Inprogress), Some(Inprogress), Some(Inprogress)]));
        assert!(!is_all_completed(vec![Some(Scheduled), Some(Timeout), Some(AckTimeout)]));
        assert!(!is_all_completed(vec![Some(Completed), None]));
        assert!(is_all_completed(Vec::new()));
    }

    #[test]
    fn test_first_task_finished() {
        let tasks = example_tasks();
        let next = get_next_task_path(&tasks, &task_path![0], &completed(&tasks, &["t1"]))
            .expect("valid path");

        assert!(!next.is_completed);
        assert_eq!(next.task_path, Some(task_path![1]));
        assert_eq!(parent_ref(&next), None);
        assert!(!next.is_last_child);
        assert!(next.closed_scopes.is_empty());
    }

    #[test]
    fn test_child_of_decision() {
        let tasks = example_tasks();
        let next = get_next_task_path(
            &tasks,
            &task_path![1, "decisions", "case1", 0],
            &completed(&tasks, &["t1", "t2", "t3"]),
        )
        .expect("valid path");

        assert!(!next.is_completed);
        assert_eq!(next.task_path, Some(task_path![1, "decisions", "case1", 1]));
        assert_eq!(parent_ref(&next), Some("t2"));
        assert!(!next.is_last_child);
    }

    #[test]
    fn test_child_of_decision_last_task() {
        let tasks = example_tasks();
        let next = get_next_task_path(
            &tasks,
            &task_path![1, "decisions", "case1", 1],
            &completed(&tasks, &["t1", "t2", "t3", "t4"]),
        )
        .expect("valid path");

        assert!(!next.is_completed);
        assert_eq!(next.task_path, Some(task_path![2]));
        assert_eq!(parent_ref(&next), Some("t2"));
        assert!(next.is_last_child);
        assert_eq!(next.closed_scopes, vec![task_path![1]]);
    }

    #[test]
    fn test_child_of_decision_completes_workflow() {
        let tasks: Vec<_> = example_tasks().into_iter().take(2).collect();
        let next = get_next_task_path(
            &tasks,
            &task_path![1, "decisions", "case1", 1],
            &completed(&tasks, &["t1", "t2", "t3", "t4"]),
        )
        .expect("valid path");

        assert!(next.is_completed);
        assert_eq!(next.task_path, None);
        assert_eq!(parent_ref(&next), Some("t2"));
        assert!(next.is_last_child);
    }

    #[test]
    fn test_child_of_decision_default() {
        let tasks = example_tasks();
        let next = get_next_task_path(
            &tasks,
            &task_path![1, "defaultDecision", 1],
            &completed(&tasks, &["t1", "t2", "t7", "t8"]),
        )
        .expect("valid path");

        assert_eq!(next.task_path, Some(task_path![1, "defaultDecision", 2]));
        assert_eq!(parent_ref(&next), Some("t2"));
        assert!(!next.is_last_child);
    }

    #[test]
    fn test_child_of_parallel_wait() {
        let tasks = example_tasks();
        let results = results(
            &tasks,
            &[
                ("t1", TaskStatus::Completed),
                ("t2", TaskStatus::Completed),
                ("t3", TaskStatus::Completed),
                ("t4", TaskStatus::Completed),
                ("t12", TaskStatus::Completed),
                ("t13", TaskStatus::Completed),
                ("t14", TaskStatus::Inprogress),
            ],
        );
        let next = get_next_task_path(&tasks, &task_path![2, "parallelTasks", 0, 0], &results)
            .expect("valid path");

        assert!(!next.is_completed);
        assert_eq!(next.task_path, None);
        assert!(next.is_waiting());
        assert_eq!(parent_ref(&next), Some("t12"));
        assert!(!next.is_last_child);
    }

    #[test]
    fn test_child_of_parallel_all_completed() {
        let tasks = example_tasks();
        let next = get_next_task_path(
            &tasks,
            &task_path![2, "parallelTasks", 0, 0],
            &completed(&tasks, &["t1", "t2", "t3", "t4", "t12", "t13", "t14"]),
        )
        .expect("valid path");

        assert!(next.is_completed);
        assert_eq!(next.task_path, None);
        assert_eq!(parent_ref(&next), Some("t12"));
        assert!(next.is_last_child);
        assert_eq!(next.closed_scopes, vec![task_path![2]]);
    }

    #[test]
    fn test_nested_parallel_closes_every_scope() {
        let tasks = example_tasks();
        let next = get_next_task_path(
            &tasks,
            &task_path![1, "defaultDecision", 2, "parallelTasks", 1, 0],
            &completed(&tasks, &["t1", "t2", "t7", "t8", "t9", "t10", "t11"]),
        )
        .expect("valid path");

        assert_eq!(next.task_path, Some(task_path![2]));
        assert_eq!(parent_ref(&next), Some("t9"));
        assert!(next.is_last_child);
        assert_eq!(
            next.closed_scopes,
            vec![task_path![1, "defaultDecision", 2], task_path![1]]
        );
    }

    #[test]
    fn test_parallel_closing_lane_of_outer_parallel() {
        let tasks = vec![TaskNode::parallel(
            "p",
            vec![
                vec![t("a"), TaskNode::parallel("q", vec![vec![t("b")], vec![t("c")]])],
                vec![t("d")],
            ],
        )];
        let results = results(
            &tasks,
            &[
                ("p", TaskStatus::Inprogress),
                ("a", TaskStatus::Completed),
                ("q", TaskStatus::Inprogress),
                ("b", TaskStatus::Completed),
                ("c", TaskStatus::Completed),
                ("d", TaskStatus::Completed),
            ],
        );
        let next = get_next_task_path(
            &tasks,
            &task_path![0, "parallelTasks", 0, 1, "parallelTasks", 1, 0],
            &results,
        )
        .expect("valid path");

        assert!(next.is_completed);
        assert_eq!(
            next.closed_scopes,
            vec![task_path![0, "parallelTasks", 0, 1], task_path![0]]
        );
    }

    #[test]
    fn test_last_top_level_task() {
        let tasks = vec![t("t1"), t("t2")];
        let next = get_next_task_path(&tasks, &task_path![1], &completed(&tasks, &["t1", "t2"]))
            .expect("valid path");
        assert!(next.is_completed);
        assert_eq!(next.task_path, None);
    }

    #[test]
    fn test_invalid_path() {
        let tasks = example_tasks();
        let result = get_next_task_path(&tasks, &task_path![7], &TaskResults::new());
        assert!(matches!(result, Err(EngineError::InvalidPath(path)) if path == task_path![7]));
    }
}
