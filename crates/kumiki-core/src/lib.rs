//! Core types and navigation logic for the kumiki workflow engine.
//!
//! This crate has no runtime dependencies. It holds the workflow definition
//! model, the path addressing scheme over task trees, the navigation rules
//! that decide what runs after a task completes, and the interfaces of the
//! stores and message bus the engine is built on.
//!
//! # Core Types
//!
//! - [`WorkflowDefinition`] - A versioned tree of [`TaskNode`]s
//! - [`TaskPath`] - Location of a node inside a task tree
//! - [`find_task_path`] - Reference-name lookup with an optional starting hint
//! - [`get_next_task_path`] - What follows a completed task
//! - [`TaskInstance`], [`WorkflowInstance`], [`TransactionInstance`] - Runtime records
//! - [`EngineError`] - Error types for navigation and state transitions
//!
//! # Collaborators
//!
//! - [`TaskInstanceStore`], [`WorkflowInstanceStore`], [`TransactionInstanceStore`]
//! - [`WorkflowDefinitionStore`]
//! - [`MessageBus`]

mod compensation;
mod definition;
mod error;
mod event;
mod instance;
mod navigation;
mod parameters;
mod path;
mod resolver;
mod traits;

pub use compensation::{compensation_definition, compensation_tasks, COMPENSATE_REV_SUFFIX};
pub use definition::{
    DecisionTask, FailureStrategy, DEFAULT_ACK_TIMEOUT_MS, DEFAULT_TIMEOUT_MS, ParallelTask, Parameters, SubWorkflowTask, TaskDefinition,
    TaskNode, TaskRetry, TaskType, WorkflowDefinition, WorkflowDefinitionBuilder, WorkflowRef,
    WorkflowRetry,
};
pub use error::{BusError, EngineError, RecordKind, StoreError};
pub use event::{Event, EventCategory, EventDetails};
pub use instance::{
    results_input, task_results, template_context, TaskInstance, TaskResults, TaskStatus,
    TaskUpdate, TransactionInstance, TransactionStatus, TransactionUpdate, WorkflowInstance,
    WorkflowStatus, WorkflowType, WorkflowUpdate,
};
pub use navigation::{get_next_task_path, is_all_completed, NextTaskPath};
pub use parameters::map_parameters_to_value;
pub use path::{Label, PathToken, TaskPath};
pub use resolver::find_task_path;
pub use traits::{
    BusResult, MessageBus, StoreResult, TaskInstanceStore, TransactionInstanceStore,
    WorkflowDefinitionStore, WorkflowInstanceStore,
};
