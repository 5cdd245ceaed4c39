//! Engine-level error types.

use std::time::Duration;

use thiserror::Error;

use components::ComponentError;

/// The workflow can never start: its shape is wrong.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstructionError {
    #[error("workflow '{0}' has no components")]
    EmptyWorkflow(String),

    /// Topological sort could not place these steps (sorted by id).
    #[error("circular dependency detected between steps: {}", .steps.join(", "))]
    CircularDependency { steps: Vec<String> },

    #[error("step '{step_id}' is invalid: {reason}")]
    InvalidStep { step_id: String, reason: String },
}

/// Errors produced by the workflow engine (construction + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Construction ------
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    // ------ Step execution ------

    /// The step's component, action or event could not be built from its
    /// configuration (unknown type name, rejected parameters).
    #[error("config resolution failed for step '{step_id}': {message}")]
    ConfigResolution { step_id: String, message: String },

    /// A third-party component rejected its setup profile.
    #[error("setup of component '{component}' failed for step '{step_id}': {message}")]
    Setup {
        step_id: String,
        component: String,
        message: String,
    },

    /// The action or event raised instead of returning a result.
    #[error("step '{step_id}' failed: {message}")]
    StepFault { step_id: String, message: String },

    #[error("step '{step_id}' timed out after {seconds}s")]
    Timeout { step_id: String, seconds: f64 },

    // ------ Reactive lifecycle ------
    #[error("persistent trigger '{step_id}' failed to start: {message}")]
    ListenerStartup { step_id: String, message: String },

    #[error("listener '{step_id}' did not stop within {waited:?}")]
    Cleanup { step_id: String, waited: Duration },

    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
}

impl EngineError {
    /// Map a registry/factory failure for `step_id` onto the engine taxonomy.
    pub(crate) fn from_component(step_id: &str, err: ComponentError) -> Self {
        match err {
            ComponentError::Fault(_) => Self::fault(step_id, err),
            other => Self::ConfigResolution {
                step_id: step_id.to_owned(),
                message: other.to_string(),
            },
        }
    }

    /// A failure raised while the step was running.
    pub(crate) fn fault(step_id: &str, err: ComponentError) -> Self {
        let message = match err {
            ComponentError::Fault(message) => message,
            other => other.to_string(),
        };
        Self::StepFault {
            step_id: step_id.to_owned(),
            message,
        }
    }

    pub(crate) fn timeout(step_id: &str, bound: Duration) -> Self {
        Self::Timeout {
            step_id: step_id.to_owned(),
            seconds: bound.as_secs_f64(),
        }
    }
}
