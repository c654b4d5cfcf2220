//! Outcome events published on the message bus.

use crate::instance::{TaskInstance, TaskUpdate, TransactionInstance, WorkflowInstance};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What an [`Event`] is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    Transaction,
    Workflow,
    Task,
    /// Errors raised while processing a task update.
    System,
}

/// Record carried by an [`Event`]: the stored record after a change, or the
/// rejected update for `SYSTEM` errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventDetails {
    Transaction(TransactionInstance),
    Workflow(WorkflowInstance),
    Task(TaskInstance),
    TaskUpdate(TaskUpdate),
}

/// Envelope sent with [`MessageBus::send_event`](crate::MessageBus::send_event).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub transaction_id: String,
    #[serde(rename = "type")]
    pub category: EventCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<EventDetails>,
    pub timestamp: DateTime<Utc>,
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Event {
    fn new(transaction_id: String, category: EventCategory, details: EventDetails) -> Self {
        Self {
            transaction_id,
            category,
            details: Some(details),
            timestamp: Utc::now(),
            is_error: false,
            error: None,
        }
    }

    pub fn transaction(transaction: &TransactionInstance) -> Self {
        Self::new(
            transaction.transaction_id.clone(),
            EventCategory::Transaction,
            EventDetails::Transaction(transaction.clone()),
        )
    }

    pub fn workflow(workflow: &WorkflowInstance) -> Self {
        Self::new(
            workflow.transaction_id.clone(),
            EventCategory::Workflow,
            EventDetails::Workflow(workflow.clone()),
        )
    }

    pub fn task(task: &TaskInstance) -> Self {
        Self::new(
            task.transaction_id.clone(),
            EventCategory::Task,
            EventDetails::Task(task.clone()),
        )
    }

    /// Reports that processing `update` failed with `error`.
    pub fn system_error(update: &TaskUpdate, error: impl ToString) -> Self {
        Self {
            is_error: true,
            error: Some(error.to_string()),
            ..Self::new(
                update.transaction_id.clone(),
                EventCategory::System,
                EventDetails::TaskUpdate(update.clone()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::TaskStatus;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_system_error_event() {
        let update = TaskUpdate {
            transaction_id: "tx-1".to_string(),
            workflow_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            status: TaskStatus::Completed,
            output: None,
            logs: Vec::new(),
            is_system: false,
        };
        let event = Event::system_error(&update, "task not found");

        assert_eq!(event.category, EventCategory::System);
        assert!(event.is_error);
        assert_eq!(event.error.as_deref(), Some("task not found"));
        assert_eq!(event.details, Some(EventDetails::TaskUpdate(update)));

        let value = serde_json::to_value(&event).expect("serializable");
        assert_eq!(value["type"], json!("SYSTEM"));
        assert_eq!(value["transactionId"], json!("tx-1"));
        assert_eq!(value["isError"], json!(true));
        assert_eq!(value["details"]["isSystem"], json!(false));
        assert_eq!(value["details"]["kind"], json!("TASK_UPDATE"));
        assert_eq!(value["details"]["status"], json!("COMPLETED"));
    }
}
