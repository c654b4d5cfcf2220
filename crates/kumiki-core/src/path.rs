//! Addressing of nodes inside a workflow task tree.
//!
//! A [`TaskPath`] is walked from the top-level task list one token at a time:
//! an index picks a list entry (or a parallel lane), a structural label steps
//! into a decision or parallel node, and a key picks a decision case.

use crate::definition::TaskNode;
use std::collections::BTreeMap;
use std::fmt;

/// Structural labels that step into a container node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    /// The case map of a decision node.
    Decisions,
    /// The fallback branch of a decision node.
    DefaultDecision,
    /// The lane list of a parallel node.
    ParallelTasks,
}

impl Label {
    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Decisions => "decisions",
            Label::DefaultDecision => "defaultDecision",
            Label::ParallelTasks => "parallelTasks",
        }
    }
}

/// One step of a [`TaskPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathToken {
    /// Position within a sibling list or lane list.
    Index(usize),
    /// Step into a container node.
    Label(Label),
    /// Decision case label.
    Key(String),
}

impl PathToken {
    pub fn key(case: impl Into<String>) -> Self {
        PathToken::Key(case.into())
    }
}

impl From<usize> for PathToken {
    fn from(index: usize) -> Self {
        PathToken::Index(index)
    }
}

impl From<Label> for PathToken {
    fn from(label: Label) -> Self {
        PathToken::Label(label)
    }
}

/// Structural label names map to [`PathToken::Label`], anything else to a case key.
impl From<&str> for PathToken {
    fn from(token: &str) -> Self {
        match token {
            "decisions" => PathToken::Label(Label::Decisions),
            "defaultDecision" => PathToken::Label(Label::DefaultDecision),
            "parallelTasks" => PathToken::Label(Label::ParallelTasks),
            key => PathToken::key(key),
        }
    }
}

impl fmt::Display for PathToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathToken::Index(index) => write!(f, "{}", index),
            PathToken::Label(label) => write!(f, "{}", label.as_str()),
            PathToken::Key(key) => write!(f, "{:?}", key),
        }
    }
}

/// Location of a node inside a task tree.
///
/// # Examples
///
/// ```
/// use kumiki_core::{task_path, PathToken, TaskPath};
///
/// let path = task_path![1, "decisions", "case1", 0];
/// assert_eq!(path.tokens()[3], PathToken::Index(0));
/// assert_eq!(path.next_sibling(), Some(task_path![1, "decisions", "case1", 1]));
/// assert_eq!(TaskPath::root(), task_path![0]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TaskPath(Vec<PathToken>);

/// Builds a [`TaskPath`] from integer indexes and label or key strings.
#[macro_export]
macro_rules! task_path {
    ($($token:expr),* $(,)?) => {
        $crate::TaskPath::new(vec![$($crate::PathToken::from($token)),*])
    };
}

impl TaskPath {
    pub fn new(tokens: Vec<PathToken>) -> Self {
        Self(tokens)
    }

    /// Path of the first top-level task.
    pub fn root() -> Self {
        Self(vec![PathToken::Index(0)])
    }

    pub fn tokens(&self) -> &[PathToken] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns this path extended with `tokens`.
    pub fn join<I>(&self, tokens: I) -> TaskPath
    where
        I: IntoIterator<Item = PathToken>,
    {
        let mut path = self.0.clone();
        path.extend(tokens);
        TaskPath(path)
    }

    /// Returns this path with the last `count` tokens removed.
    pub fn ancestor(&self, count: usize) -> TaskPath {
        TaskPath(self.0[..self.0.len().saturating_sub(count)].to_vec())
    }

    /// Token `offset` places from the end, where `1` is the last token.
    fn nth_last(&self, offset: usize) -> Option<&PathToken> {
        self.0
            .len()
            .checked_sub(offset)
            .and_then(|index| self.0.get(index))
    }

    /// Increments the final index, keeping every preceding token.
    ///
    /// Returns `None` when the path does not end in an index.
    pub fn next_sibling(&self) -> Option<TaskPath> {
        match self.0.last() {
            Some(PathToken::Index(index)) => {
                let mut path = self.0.clone();
                let last = path.len() - 1;
                path[last] = PathToken::Index(index + 1);
                Some(TaskPath(path))
            }
            _ => None,
        }
    }

    /// Resolves the path to a node of `tree`.
    ///
    /// Returns `None` when an index is out of range, a token does not fit the
    /// node kind at its depth, or the path stops short of a node.
    pub fn resolve<'a>(&self, tree: &'a [TaskNode]) -> Option<&'a TaskNode> {
        match self.walk(tree)? {
            Cursor::Node(node) => Some(node),
            _ => None,
        }
    }

    fn walk<'a>(&self, tree: &'a [TaskNode]) -> Option<Cursor<'a>> {
        self.0
            .iter()
            .try_fold(Cursor::List(tree), |cursor, token| cursor.step(token))
    }

    /// True iff this is the outermost task list's last entry.
    pub fn is_last_top_level_task(&self, tree: &[TaskNode]) -> bool {
        match self.0.as_slice() {
            [PathToken::Index(index)] => !tree.is_empty() && *index == tree.len() - 1,
            _ => false,
        }
    }

    /// True iff the node two levels up is a decision and this path sits in its default branch.
    pub fn is_inside_decision_default(&self, tree: &[TaskNode]) -> bool {
        self.nth_last(2) == Some(&PathToken::Label(Label::DefaultDecision))
            && matches!(self.ancestor(2).resolve(tree), Some(TaskNode::Decision(_)))
    }

    /// True iff the node three levels up is a decision and this path sits in one of its cases.
    pub fn is_inside_decision_case(&self, tree: &[TaskNode]) -> bool {
        self.len() >= 4
            && self.nth_last(3) == Some(&PathToken::Label(Label::Decisions))
            && matches!(self.ancestor(3).resolve(tree), Some(TaskNode::Decision(_)))
    }

    /// True iff the node three levels up is a parallel node.
    pub fn is_inside_parallel_lane(&self, tree: &[TaskNode]) -> bool {
        self.len() >= 4 && matches!(self.ancestor(3).resolve(tree), Some(TaskNode::Parallel(_)))
    }
}

impl fmt::Display for TaskPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, token) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", token)?;
        }
        write!(f, "]")
    }
}

/// Position reached while interpreting a path.
#[derive(Clone, Copy)]
enum Cursor<'a> {
    List(&'a [TaskNode]),
    Node(&'a TaskNode),
    Lanes(&'a [Vec<TaskNode>]),
    Cases(&'a BTreeMap<String, Vec<TaskNode>>),
}

impl<'a> Cursor<'a> {
    fn step(self, token: &PathToken) -> Option<Cursor<'a>> {
        match (self, token) {
            (Cursor::List(list), PathToken::Index(index)) => list.get(*index).map(Cursor::Node),
            (Cursor::Lanes(lanes), PathToken::Index(index)) => {
                lanes.get(*index).map(|lane| Cursor::List(lane))
            }
            (Cursor::Cases(cases), PathToken::Key(case)) => {
                cases.get(case).map(|branch| Cursor::List(branch))
            }
            (Cursor::Node(TaskNode::Decision(decision)), PathToken::Label(Label::Decisions)) => {
                Some(Cursor::Cases(&decision.decisions))
            }
            (
                Cursor::Node(TaskNode::Decision(decision)),
                PathToken::Label(Label::DefaultDecision),
            ) => Some(Cursor::List(&decision.default_decision)),
            (
                Cursor::Node(TaskNode::Parallel(parallel)),
                PathToken::Label(Label::ParallelTasks),
            ) => Some(Cursor::Lanes(&parallel.parallel_tasks)),
            _ => None,
        }
    }
}
