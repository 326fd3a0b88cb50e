//! Drover Core Library
//!
//! This crate provides the core functionality for the Drover daemon:
//! task queue coordination, the idea workflow state machine, and the
//! feedback-driven learning pipeline (episode capture, rule distillation,
//! rule selection).

pub mod agent;
pub mod classify;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod learning;
pub mod llm;
pub mod store;
pub mod types;
pub mod utils;
pub mod workflow;

// Re-export commonly used types
pub use classify::{
    Complexity, FailureClassification, FailureKind, classify_complexity, classify_failure,
};
pub use config::DroverConfig;
pub use coordinator::{Coordinator, recover_stale_tasks};
pub use error::{DroverError, DroverResult};
pub use learning::{EpisodeRecorder, RuleDistiller, RuleSelector};
pub use store::{HttpStore, MemoryStore, StoreError, TaskStore};
pub use types::*;
pub use workflow::IdeaWorkflow;
