//! Engine and store error types.

use crate::path::TaskPath;
use thiserror::Error;
use uuid::Uuid;

/// The kind of record a store operation touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// A task instance.
    Task,
    /// A workflow instance.
    Workflow,
    /// A transaction instance.
    Transaction,
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::Task => write!(f, "task"),
            RecordKind::Workflow => write!(f, "workflow"),
            RecordKind::Transaction => write!(f, "transaction"),
        }
    }
}

/// Errors raised by instance stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// No record with the given id exists.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Which store was queried.
        kind: RecordKind,
        /// The id that was looked up.
        id: String,
    },

    /// A record with the same id is already stored.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Which store rejected the create.
        kind: RecordKind,
        /// The conflicting id.
        id: String,
    },

    /// The stored status is not a legal predecessor of the requested one.
    #[error("{kind} {id} is {actual}, expected one of [{expected}] before moving to {requested}")]
    StatusMismatch {
        /// Which store rejected the update.
        kind: RecordKind,
        /// The record id.
        id: String,
        /// Status currently stored.
        actual: String,
        /// Status the update asked for.
        requested: String,
        /// Statuses the update would have been accepted from.
        expected: String,
    },

    /// The transaction transition table does not allow this change.
    #[error("Cannot change status of transaction {id} from {from} to {to}")]
    InvalidTransition {
        /// The transaction id.
        id: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },

    /// Any other backend failure.
    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::NotFound`].
    pub fn not_found(kind: RecordKind, id: impl ToString) -> Self {
        StoreError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

/// Error returned by a [`MessageBus`](crate::MessageBus) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BusError(pub String);

/// Errors that can occur while navigating or advancing a workflow.
///
/// Any of these raised while handling a single task-status event is isolated
/// to that event: the executor reports it as a `SYSTEM` error event and moves
/// on to the next one.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// The path does not address a node, or navigation reached a branch a
    /// well-formed tree can never produce.
    #[error("Invalid task path: {0}")]
    InvalidPath(TaskPath),

    /// A task reference name does not occur in the workflow definition.
    #[error("Task reference not found in workflow definition: {0}")]
    TaskNotFound(String),

    /// A workflow definition was rejected when it was built.
    #[error("Invalid workflow definition: {0}")]
    Validation(String),

    /// A referenced workflow definition is not registered.
    #[error("Workflow definition not found: {name}@{rev}")]
    DefinitionNotFound {
        /// Definition name.
        name: String,
        /// Definition revision.
        rev: String,
    },

    /// A sub-workflow instance has no spawning task to report back to.
    #[error("Sub-workflow {0} has no parent task")]
    DetachedSubWorkflow(Uuid),

    /// A store rejected a read or write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The message bus failed to poll, commit or send.
    #[error("Message bus error: {0}")]
    Bus(#[from] BusError),

    /// An instance could not be rendered as a template context.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = EngineError::TaskNotFound("t9".to_string());
        assert_eq!(
            error.to_string(),
            "Task reference not found in workflow definition: t9"
        );

        let error = EngineError::DefinitionNotFound {
            name: "ORDER".to_string(),
            rev: "2".to_string(),
        };
        assert_eq!(error.to_string(), "Workflow definition not found: ORDER@2");
    }

    #[test]
    fn test_store_error_display() {
        let error = StoreError::InvalidTransition {
            id: "tx-1".to_string(),
            from: "COMPLETED".to_string(),
            to: "FAILED".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Cannot change status of transaction tx-1 from COMPLETED to FAILED"
        );

        let error: EngineError = StoreError::not_found(RecordKind::Workflow, "w-1").into();
        assert_eq!(error.to_string(), "workflow not found: w-1");
    }

    #[test]
    fn test_bus_error_display() {
        let error: EngineError = BusError("broker unavailable".to_string()).into();
        assert_eq!(error.to_string(), "Message bus error: broker unavailable");
    }
}
