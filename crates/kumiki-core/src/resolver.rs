//! Reference-name lookup over a task tree.

use crate::definition::TaskNode;
use crate::path::{Label, PathToken, TaskPath};

/// Finds the path of the node named `reference` in `tasks`.
///
/// The walk is depth first and starts at `hint` (the first top-level task
/// when `None`). Parallel lanes are searched in order, then decision cases in
/// key order followed by the default branch, before the walk moves on to the
/// container's next sibling. Returns `None` once the walk falls off the end of
/// the list it started in.
///
/// # Examples
///
/// ```
/// use kumiki_core::{find_task_path, task_path, TaskNode};
///
/// let tasks = vec![
///     TaskNode::task("reserve", "t1"),
///     TaskNode::parallel("t2", vec![vec![TaskNode::task("a", "t3")], vec![TaskNode::task("b", "t4")]]),
/// ];
/// assert_eq!(find_task_path("t4", &tasks, None), Some(task_path![1, "parallelTasks", 1, 0]));
/// assert_eq!(find_task_path("t9", &tasks, None), None);
/// ```
pub fn find_task_path(reference: &str, tasks: &[TaskNode], hint: Option<&TaskPath>) -> Option<TaskPath> {
    let start = hint.cloned().unwrap_or_else(TaskPath::root);
    PathSearch::new(reference, tasks).search(start)
}

/// Search state; `probes` counts visited positions.
struct PathSearch<'a> {
    reference: &'a str,
    tasks: &'a [TaskNode],
    probes: usize,
}

impl<'a> PathSearch<'a> {
    fn new(reference: &'a str, tasks: &'a [TaskNode]) -> Self {
        Self {
            reference,
            tasks,
            probes: 0,
        }
    }

    fn search(&mut self, start: TaskPath) -> Option<TaskPath> {
        let mut current = start;
        loop {
            self.probes += 1;
            let node = current.resolve(self.tasks)?;
            if node.reference_name() == self.reference {
                return Some(current);
            }

            let found = match node {
                TaskNode::Parallel(parallel) => (0..parallel.parallel_tasks.len()).find_map(|lane| {
                    self.search(current.join([
                        PathToken::Label(Label::ParallelTasks),
                        PathToken::Index(lane),
                        PathToken::Index(0),
                    ]))
                }),
                TaskNode::Decision(decision) => decision
                    .decisions
                    .keys()
                    .map(|case| {
                        current.join([
                            PathToken::Label(Label::Decisions),
                            PathToken::key(case.as_str()),
                            PathToken::Index(0),
                        ])
                    })
                    .chain(std::iter::once(current.join([
                        PathToken::Label(Label::DefaultDecision),
                        PathToken::Index(0),
                    ])))
                    .find_map(|branch| self.search(branch)),
                TaskNode::Task(_) | TaskNode::Compensate(_) | TaskNode::SubWorkflow(_) => None,
            };
            if found.is_some() {
                return found;
            }

            current = current.next_sibling()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_path;

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

    fn probes(reference: &str, tasks: &[TaskNode], hint: TaskPath) -> (Option<TaskPath>, usize) {
        let mut search = PathSearch::new(reference, tasks);
        let found = search.search(hint);
        (found, search.probes)
    }

    #[test]
    fn test_find_task_path() {
        let tasks = example_tasks();
        let cases = [
            ("t1", task_path![0]),
            ("t2", task_path![1]),
            ("t3", task_path![1, "decisions", "case1", 0]),
            ("t4", task_path![1, "decisions", "case1", 1]),
            ("t5", task_path![1, "decisions", "case2", 0]),
            ("t6", task_path![1, "decisions", "case2", 1]),
            ("t7", task_path![1, "defaultDecision", 0]),
            ("t8", task_path![1, "defaultDecision", 1]),
            ("t9", task_path![1, "defaultDecision", 2]),
            ("t10", task_path![1, "defaultDecision", 2, "parallelTasks", 0, 0]),
            ("t11", task_path![1, "defaultDecision", 2, "parallelTasks", 1, 0]),
            ("t12", task_path![2]),
            ("t13", task_path![2, "parallelTasks", 0, 0]),
            ("t14", task_path![2, "parallelTasks", 1, 0]),
        ];
        for (reference, expected) in cases {
            assert_eq!(
                find_task_path(reference, &tasks, None),
                Some(expected),
                "reference {}",
                reference
            );
        }
    }

    #[test]
    fn test_find_task_path_missing() {
        let tasks = example_tasks();
        assert_eq!(find_task_path("t15", &tasks, None), None);
        assert_eq!(find_task_path("t1", &[], None), None);
    }

    #[test]
    fn test_find_task_path_with_hint() {
        let tasks = example_tasks();
        let hint = task_path![1, "decisions", "case1", 0];

        let (from_root, root_probes) = probes("t4", &tasks, TaskPath::root());
        let (from_hint, hint_probes) = probes("t4", &tasks, hint.clone());

        assert_eq!(from_root, from_hint);
        assert_eq!(root_probes, 4);
        assert_eq!(hint_probes, 2);
        assert!(hint_probes < root_probes);
        assert_eq!(
            find_task_path("t4", &tasks, Some(&hint)),
            Some(task_path![1, "decisions", "case1", 1])
        );
    }

    #[test]
    fn test_find_task_path_with_ancestor_hint() {
        let tasks = example_tasks();

        let (from_root, root_probes) = probes("t4", &tasks, TaskPath::root());
        let (from_decision, decision_probes) = probes("t4", &tasks, task_path![1]);

        assert_eq!(from_decision, from_root);
        assert_eq!(decision_probes, 3);
        assert!(decision_probes < root_probes);

        let (found, probes_t11) = probes("t11", &tasks, task_path![1, "defaultDecision", 2]);
        assert_eq!(found, Some(task_path![1, "defaultDecision", 2, "parallelTasks", 1, 0]));
        assert!(probes_t11 < probes("t11", &tasks, TaskPath::root()).1);
    }

    #[test]
    fn test_find_task_path_hint_stays_in_branch() {
        let tasks = example_tasks();
        let hint = task_path![1, "decisions", "case1", 0];
        assert_eq!(find_task_path("t12", &tasks, Some(&hint)), None);
    }
}
