//! Collaborator interfaces the engine is constructed with.
//!
//! Stores persist instance records and enforce the status rules on update;
//! the message bus carries task updates in and dispatches and events out.

use crate::definition::{WorkflowDefinition, WorkflowRef};
use crate::error::{BusError, StoreError};
use crate::event::Event;
use crate::instance::{
    TaskInstance, TaskUpdate, TransactionInstance, TransactionUpdate, WorkflowInstance,
    WorkflowUpdate,
};
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result alias for message bus operations.
pub type BusResult<T> = Result<T, BusError>;

/// Persistence for task instances.
#[async_trait]
pub trait TaskInstanceStore: Send + Sync {
    /// Stores a new instance.
    async fn create(&self, task: TaskInstance) -> StoreResult<TaskInstance>;

    /// Applies `update` and returns the stored result.
    ///
    /// Fails with [`StoreError::StatusMismatch`] unless the stored status is a
    /// predecessor of `update.status` (see [`TaskStatus::predecessors`](crate::TaskStatus::predecessors)).
    async fn update(&self, update: &TaskUpdate) -> StoreResult<TaskInstance>;

    async fn get(&self, task_id: Uuid) -> StoreResult<TaskInstance>;

    /// Every instance of the workflow, in creation order.
    async fn get_all(&self, workflow_id: Uuid) -> StoreResult<Vec<TaskInstance>>;

    async fn delete(&self, task_id: Uuid) -> StoreResult<()>;

    async fn delete_all(&self, workflow_id: Uuid) -> StoreResult<()>;
}

/// Persistence for workflow instances.
#[async_trait]
pub trait WorkflowInstanceStore: Send + Sync {
    async fn create(&self, workflow: WorkflowInstance) -> StoreResult<WorkflowInstance>;

    /// Applies `update`; terminal statuses are only accepted from `Running`.
    async fn update(&self, update: &WorkflowUpdate) -> StoreResult<WorkflowInstance>;

    async fn get(&self, workflow_id: Uuid) -> StoreResult<WorkflowInstance>;

    /// Every workflow instance of the transaction, in creation order.
    async fn get_by_transaction_id(&self, transaction_id: &str) -> StoreResult<Vec<WorkflowInstance>>;

    async fn delete_all(&self, transaction_id: &str) -> StoreResult<()>;
}

/// Persistence for transactions.
#[async_trait]
pub trait TransactionInstanceStore: Send + Sync {
    /// Fails with [`StoreError::AlreadyExists`] if the id is taken.
    async fn create(&self, transaction: TransactionInstance) -> StoreResult<TransactionInstance>;

    /// Fails with [`StoreError::InvalidTransition`] outside the transition table.
    async fn update(&self, update: &TransactionUpdate) -> StoreResult<TransactionInstance>;

    async fn get(&self, transaction_id: &str) -> StoreResult<TransactionInstance>;

    async fn delete(&self, transaction_id: &str) -> StoreResult<()>;
}

/// Registered workflow definitions, looked up for sub-workflows and recovery.
#[async_trait]
pub trait WorkflowDefinitionStore: Send + Sync {
    async fn get(&self, workflow: &WorkflowRef) -> StoreResult<Option<WorkflowDefinition>>;
}

/// Transport between the engine and workers.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Waits up to `timeout` for task updates and returns at most `max` of them.
    async fn poll(&self, max: usize, timeout: Duration) -> BusResult<Vec<TaskUpdate>>;

    /// Acknowledges everything returned by previous polls.
    async fn commit(&self) -> BusResult<()>;

    /// Sends a worker task to the destination for its task name.
    async fn dispatch(&self, task: &TaskInstance) -> BusResult<()>;

    /// Publishes an outcome or error event.
    async fn send_event(&self, event: &Event) -> BusResult<()>;
}
