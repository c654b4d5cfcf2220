//! In-memory stores and message bus for tests and local runs.

use async_trait::async_trait;
use kumiki_core::{
    BusResult, Event, MessageBus, RecordKind, StoreError, StoreResult, TaskInstance,
    TaskInstanceStore, TaskUpdate, TransactionInstance, TransactionInstanceStore,
    TransactionUpdate, WorkflowDefinition, WorkflowDefinitionStore, WorkflowInstance,
    WorkflowInstanceStore, WorkflowRef, WorkflowUpdate,
};
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Default)]
struct Records {
    tasks: HashMap<Uuid, TaskInstance>,
    workflow_tasks: HashMap<Uuid, Vec<Uuid>>,
    workflows: HashMap<Uuid, WorkflowInstance>,
    transaction_workflows: HashMap<String, Vec<Uuid>>,
    transactions: HashMap<String, TransactionInstance>,
    definitions: HashMap<WorkflowRef, WorkflowDefinition>,
}

impl Records {
    fn tasks_of(&self, workflow_id: Uuid) -> Vec<TaskInstance> {
        self.workflow_tasks
            .get(&workflow_id)
            .into_iter()
            .flatten()
            .filter_map(|task_id| self.tasks.get(task_id).cloned())
            .collect()
    }

    fn workflows_of(&self, transaction_id: &str) -> Vec<WorkflowInstance> {
        self.transaction_workflows
            .get(transaction_id)
            .into_iter()
            .flatten()
            .filter_map(|workflow_id| self.workflows.get(workflow_id).cloned())
            .collect()
    }

    fn remove_tasks_of(&mut self, workflow_id: Uuid) {
        for task_id in self.workflow_tasks.remove(&workflow_id).unwrap_or_default() {
            self.tasks.remove(&task_id);
        }
    }
}

#[derive(Default)]
struct Queues {
    updates: VecDeque<TaskUpdate>,
    dispatched: Vec<TaskInstance>,
    events: Vec<Event>,
    commits: usize,
}

/// Every collaborator the engine needs, kept in process memory.
///
/// Stores apply the same status checks a persistent store must apply.
/// Terminal records are kept so callers can inspect them afterwards.
#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<Records>,
    queues: Mutex<Queues>,
    updates_ready: Notify,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a definition for sub-workflow and recovery lookups.
    pub async fn insert_definition(&self, definition: WorkflowDefinition) {
        let mut records = self.records.lock().await;
        records.definitions.insert(definition.workflow_ref(), definition);
    }

    /// Queues a task update as if a worker had sent it.
    pub async fn publish_update(&self, update: TaskUpdate) {
        self.queues.lock().await.updates.push_back(update);
        self.updates_ready.notify_one();
    }

    pub async fn pending_updates(&self) -> usize {
        self.queues.lock().await.updates.len()
    }

    /// Every task sent to workers so far.
    pub async fn dispatched(&self) -> Vec<TaskInstance> {
        self.queues.lock().await.dispatched.clone()
    }

    /// Every event published so far.
    pub async fn events(&self) -> Vec<Event> {
        self.queues.lock().await.events.clone()
    }

    pub async fn commit_count(&self) -> usize {
        self.queues.lock().await.commits
    }

    pub async fn task(&self, task_id: Uuid) -> Option<TaskInstance> {
        self.records.lock().await.tasks.get(&task_id).cloned()
    }

    pub async fn workflow(&self, workflow_id: Uuid) -> Option<WorkflowInstance> {
        self.records.lock().await.workflows.get(&workflow_id).cloned()
    }

    /// Task instances of a workflow, in creation order.
    pub async fn workflow_tasks(&self, workflow_id: Uuid) -> Vec<TaskInstance> {
        self.records.lock().await.tasks_of(workflow_id)
    }

    /// Workflow instances of a transaction, in creation order.
    pub async fn transaction_workflows(&self, transaction_id: &str) -> Vec<WorkflowInstance> {
        self.records.lock().await.workflows_of(transaction_id)
    }

    pub async fn transaction(&self, transaction_id: &str) -> Option<TransactionInstance> {
        self.records
            .lock()
            .await
            .transactions
            .get(transaction_id)
            .cloned()
    }
}

#[async_trait]
impl TaskInstanceStore for MemoryBackend {
    async fn create(&self, task: TaskInstance) -> StoreResult<TaskInstance> {
        let mut records = self.records.lock().await;
        if records.tasks.contains_key(&task.task_id) {
            return Err(StoreError::AlreadyExists {
                kind: RecordKind::Task,
                id: task.task_id.to_string(),
            });
        }
        records
            .workflow_tasks
            .entry(task.workflow_id)
            .or_default()
            .push(task.task_id);
        records.tasks.insert(task.task_id, task.clone());
        Ok(task)
    }

    async fn update(&self, update: &TaskUpdate) -> StoreResult<TaskInstance> {
        let mut records = self.records.lock().await;
        let task = records
            .tasks
            .get_mut(&update.task_id)
            .ok_or_else(|| StoreError::not_found(RecordKind::Task, update.task_id))?;
        task.apply_update(update)?;
        Ok(task.clone())
    }

    async fn get(&self, task_id: Uuid) -> StoreResult<TaskInstance> {
        self.task(task_id)
            .await
            .ok_or_else(|| StoreError::not_found(RecordKind::Task, task_id))
    }

    async fn get_all(&self, workflow_id: Uuid) -> StoreResult<Vec<TaskInstance>> {
        Ok(self.workflow_tasks(workflow_id).await)
    }

    async fn delete(&self, task_id: Uuid) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        let task = records
            .tasks
            .remove(&task_id)
            .ok_or_else(|| StoreError::not_found(RecordKind::Task, task_id))?;
        if let Some(ids) = records.workflow_tasks.get_mut(&task.workflow_id) {
            ids.retain(|id| *id != task_id);
        }
        Ok(())
    }

    async fn delete_all(&self, workflow_id: Uuid) -> StoreResult<()> {
        self.records.lock().await.remove_tasks_of(workflow_id);
        Ok(())
    }
}

#[async_trait]
impl WorkflowInstanceStore for MemoryBackend {
    async fn create(&self, workflow: WorkflowInstance) -> StoreResult<WorkflowInstance> {
        let mut records = self.records.lock().await;
        if records.workflows.contains_key(&workflow.workflow_id) {
            return Err(StoreError::AlreadyExists {
                kind: RecordKind::Workflow,
                id: workflow.workflow_id.to_string(),
            });
        }
        records
            .transaction_workflows
            .entry(workflow.transaction_id.clone())
            .or_default()
            .push(workflow.workflow_id);
        records.workflows.insert(workflow.workflow_id, workflow.clone());
        Ok(workflow)
    }

    async fn update(&self, update: &WorkflowUpdate) -> StoreResult<WorkflowInstance> {
        let mut records = self.records.lock().await;
        let workflow = records
            .workflows
            .get_mut(&update.workflow_id)
            .ok_or_else(|| StoreError::not_found(RecordKind::Workflow, update.workflow_id))?;
        workflow.apply_update(update)?;
        Ok(workflow.clone())
    }

    async fn get(&self, workflow_id: Uuid) -> StoreResult<WorkflowInstance> {
        self.workflow(workflow_id)
            .await
            .ok_or_else(|| StoreError::not_found(RecordKind::Workflow, workflow_id))
    }

    async fn get_by_transaction_id(&self, transaction_id: &str) -> StoreResult<Vec<WorkflowInstance>> {
        Ok(self.transaction_workflows(transaction_id).await)
    }

    async fn delete_all(&self, transaction_id: &str) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        for workflow_id in records
            .transaction_workflows
            .remove(transaction_id)
            .unwrap_or_default()
        {
            records.workflows.remove(&workflow_id);
            records.remove_tasks_of(workflow_id);
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionInstanceStore for MemoryBackend {
    async fn create(&self, transaction: TransactionInstance) -> StoreResult<TransactionInstance> {
        let mut records = self.records.lock().await;
        if records.transactions.contains_key(&transaction.transaction_id) {
            return Err(StoreError::AlreadyExists {
                kind: RecordKind::Transaction,
                id: transaction.transaction_id,
            });
        }
        records
            .transactions
            .insert(transaction.transaction_id.clone(), transaction.clone());
        Ok(transaction)
    }

    async fn update(&self, update: &TransactionUpdate) -> StoreResult<TransactionInstance> {
        let mut records = self.records.lock().await;
        let transaction = records
            .transactions
            .get_mut(&update.transaction_id)
            .ok_or_else(|| StoreError::not_found(RecordKind::Transaction, &update.transaction_id))?;
        transaction.apply_update(update)?;
        Ok(transaction.clone())
    }

    async fn get(&self, transaction_id: &str) -> StoreResult<TransactionInstance> {
        self.transaction(transaction_id)
            .await
            .ok_or_else(|| StoreError::not_found(RecordKind::Transaction, transaction_id))
    }

    async fn delete(&self, transaction_id: &str) -> StoreResult<()> {
        self.records
            .lock()
            .await
            .transactions
            .remove(transaction_id)
            .map(drop)
            .ok_or_else(|| StoreError::not_found(RecordKind::Transaction, transaction_id))
    }
}

#[async_trait]
impl WorkflowDefinitionStore for MemoryBackend {
    async fn get(&self, workflow: &WorkflowRef) -> StoreResult<Option<WorkflowDefinition>> {
        Ok(self.records.lock().await.definitions.get(workflow).cloned())
    }
}

#[async_trait]
impl MessageBus for MemoryBackend {
    async fn poll(&self, max: usize, timeout: Duration) -> BusResult<Vec<TaskUpdate>> {
        let deadline = Instant::now() + timeout;
        loop {
            let ready = self.updates_ready.notified();
            {
                let mut queues = self.queues.lock().await;
                if !queues.updates.is_empty() {
                    let count = max.min(queues.updates.len());
                    return Ok(queues.updates.drain(..count).collect());
                }
            }
            if tokio::time::timeout_at(deadline, ready).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn commit(&self) -> BusResult<()> {
        self.queues.lock().await.commits += 1;
        Ok(())
    }

    async fn dispatch(&self, task: &TaskInstance) -> BusResult<()> {
        self.queues.lock().await.dispatched.push(task.clone());
        Ok(())
    }

    async fn send_event(&self, event: &Event) -> BusResult<()> {
        self.queues.lock().await.events.push(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kumiki_core::{
        TaskNode, TaskStatus, TransactionStatus, WorkflowStatus, WorkflowType,
    };
    use serde_json::Value;

    fn definition() -> WorkflowDefinition {
        WorkflowDefinition::builder("ORDER", "1")
            .task(TaskNode::task("reserve", "t1"))
            .build()
            .expect("valid definition")
    }

    async fn seeded(backend: &MemoryBackend) -> (WorkflowInstance, TaskInstance) {
        let workflow = WorkflowInstance::new("tx-1", WorkflowType::Workflow, definition(), Value::Null);
        let workflow = WorkflowInstanceStore::create(backend, workflow)
            .await
            .expect("create workflow");
        let task = TaskInstance::from_node(&workflow.workflow_definition.tasks[0], &workflow, Value::Null);
        let task = TaskInstanceStore::create(backend, task)
            .await
            .expect("create task");
        (workflow, task)
    }

    #[tokio::test]
    async fn test_task_store_checks_status() {
        let backend = MemoryBackend::new();
        let (workflow, task) = seeded(&backend).await;

        let result = TaskInstanceStore::update(&backend, &TaskUpdate::new(&task, TaskStatus::Completed)).await;
        assert!(matches!(result, Err(StoreError::StatusMismatch { .. })));

        TaskInstanceStore::update(&backend, &TaskUpdate::new(&task, TaskStatus::Inprogress))
            .await
            .expect("scheduled -> inprogress");
        let all = TaskInstanceStore::get_all(&backend, workflow.workflow_id)
            .await
            .expect("get all");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, TaskStatus::Inprogress);

        let duplicate = TaskInstanceStore::create(&backend, task.clone()).await;
        assert!(matches!(duplicate, Err(StoreError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn test_task_store_delete() {
        let backend = MemoryBackend::new();
        let (workflow, task) = seeded(&backend).await;

        TaskInstanceStore::delete(&backend, task.task_id).await.expect("delete");
        assert!(backend.task(task.task_id).await.is_none());
        assert!(backend.workflow_tasks(workflow.workflow_id).await.is_empty());

        let missing = TaskInstanceStore::get(&backend, task.task_id).await;
        assert!(matches!(missing, Err(StoreError::NotFound { kind: RecordKind::Task, .. })));
    }

    #[tokio::test]
    async fn test_workflow_store() {
        let backend = MemoryBackend::new();
        let (workflow, task) = seeded(&backend).await;

        let updated = WorkflowInstanceStore::update(
            &backend,
            &WorkflowUpdate::new(&workflow, WorkflowStatus::Completed),
        )
        .await
        .expect("running -> completed");
        assert_eq!(updated.status, WorkflowStatus::Completed);

        let by_transaction = WorkflowInstanceStore::get_by_transaction_id(&backend, "tx-1")
            .await
            .expect("by transaction");
        assert_eq!(by_transaction.len(), 1);

        WorkflowInstanceStore::delete_all(&backend, "tx-1").await.expect("delete all");
        assert!(backend.workflow(workflow.workflow_id).await.is_none());
        assert!(backend.task(task.task_id).await.is_none());
    }

    #[tokio::test]
    async fn test_transaction_store() {
        let backend = MemoryBackend::new();
        let transaction = TransactionInstance::new("tx-1", definition(), Value::Null);
        TransactionInstanceStore::create(&backend, transaction.clone())
            .await
            .expect("create");

        let duplicate = TransactionInstanceStore::create(&backend, transaction).await;
        assert!(matches!(duplicate, Err(StoreError::AlreadyExists { .. })));

        TransactionInstanceStore::update(
            &backend,
            &TransactionUpdate::new("tx-1", TransactionStatus::Cancelled),
        )
        .await
        .expect("running -> cancelled");
        let result = TransactionInstanceStore::update(
            &backend,
            &TransactionUpdate::new("tx-1", TransactionStatus::Completed),
        )
        .await;
        assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));

        TransactionInstanceStore::delete(&backend, "tx-1").await.expect("delete");
        assert!(backend.transaction("tx-1").await.is_none());
    }

    #[tokio::test]
    async fn test_definition_store() {
        let backend = MemoryBackend::new();
        backend.insert_definition(definition()).await;

        let found = WorkflowDefinitionStore::get(&backend, &WorkflowRef::new("ORDER", "1"))
            .await
            .expect("lookup");
        assert_eq!(found, Some(definition()));
        let missing = WorkflowDefinitionStore::get(&backend, &WorkflowRef::new("ORDER", "2"))
            .await
            .expect("lookup");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_poll_returns_bounded_batch() {
        let backend = MemoryBackend::new();
        let (_, task) = seeded(&backend).await;
        for _ in 0..3 {
            backend
                .publish_update(TaskUpdate::new(&task, TaskStatus::Inprogress))
                .await;
        }

        let batch = backend.poll(2, Duration::from_millis(10)).await.expect("poll");
        assert_eq!(batch.len(), 2);
        assert_eq!(backend.pending_updates().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_times_out_when_empty() {
        let backend = MemoryBackend::new();
        let batch = backend.poll(10, Duration::from_millis(100)).await.expect("poll");
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_poll_wakes_on_publish() {
        let backend = std::sync::Arc::new(MemoryBackend::new());
        let (_, task) = seeded(&backend).await;

        let publisher = backend.clone();
        let update = TaskUpdate::new(&task, TaskStatus::Inprogress);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish_update(update).await;
        });

        let batch = backend.poll(10, Duration::from_secs(5)).await.expect("poll");
        assert_eq!(batch.len(), 1);
    }
}
