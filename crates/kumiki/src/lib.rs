//! An event-driven workflow orchestration engine for Rust.
//!
//! Workflows are trees of worker tasks, decisions, parallel lanes and
//! sub-workflows. Workers report task status through a message bus; the
//! [`Executor`] feeds those updates to the [`Engine`], which dispatches what
//! runs next, finishes workflows and applies failure strategies (retry,
//! compensation, recovery).
//!
//! # Example
//!
//! ```rust,ignore
//! use kumiki::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = Arc::new(MemoryBackend::new());
//!     let engine = Arc::new(
//!         Engine::builder()
//!             .backend(backend.clone())
//!             .build()
//!             .expect("valid engine"),
//!     );
//!
//!     let definition = WorkflowDefinition::builder("ORDER", "1")
//!         .task(TaskNode::task("reserve", "reserve"))
//!         .task(TaskNode::task("charge", "charge").with_input("amount", "${workflow.input.amount}"))
//!         .failure_strategy(FailureStrategy::Compensate)
//!         .build()
//!         .expect("valid definition");
//!
//!     engine
//!         .start_transaction("order-1", definition, serde_json::json!({"amount": 42}))
//!         .await
//!         .expect("transaction started");
//!
//!     let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//!     let executor = Executor::new(engine, ExecutorConfig::default()).expect("valid config");
//!     executor.run(shutdown_rx).await;
//! }
//! ```

mod config;
mod engine;
mod executor;
pub mod memory;

// Re-export core types
pub use kumiki_core::*;

pub use config::ExecutorConfig;
pub use engine::{Engine, EngineBuilder, EngineFuture};
pub use executor::Executor;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::memory::MemoryBackend;
    pub use crate::{
        Engine, EngineBuilder, EngineError, Executor, ExecutorConfig, FailureStrategy,
        MessageBus, TaskInstance, TaskNode, TaskStatus, TaskUpdate, TransactionStatus,
        WorkflowDefinition, WorkflowRef, WorkflowStatus, WorkflowType,
    };
}
