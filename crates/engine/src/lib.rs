//! `engine` crate: workflow models, dependency inference, scheduling and the
//! batch/reactive execution engine.

pub mod dag;
pub mod dependency;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod models;
pub mod plan;
mod reactive;
pub mod report;

pub use dag::topological_order;
pub use dependency::{DependencyGraph, DependencyInference, DependencyRelation, PlaceholderInference};
pub use error::{ConstructionError, EngineError};
pub use executor::{EngineConfig, WorkflowEngine, WorkflowRun};
pub use lifecycle::{CleanupReport, ListenerState};
pub use models::{StepClass, StepConfig, WorkflowDefinition};
pub use plan::ExecutionPlan;
pub use report::{CycleRecord, ExecutionReport, RunMode, StepRecord};

#[cfg(test)]
mod executor_tests;
