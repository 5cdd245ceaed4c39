//! Result records handed back to callers.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use components::traits::{error_message, is_success};
use components::{ContextSnapshot, Params, ResultMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Every step runs once, in order.
    Batch,
    /// Persistent triggers keep re-running the actions on every event.
    Reactive,
}

/// Outcome of a single step execution.
#[derive(Debug, Clone, Serialize)]
pub struct StepRecord {
    pub step_id: String,
    pub success: bool,
    /// The step's full result map (empty when it faulted).
    pub output: ResultMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Parameters after placeholder substitution.
    pub resolved_params: Params,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl StepRecord {
    /// Record a returned result map; `"success": false` marks a failure.
    pub(crate) fn completed(
        step_id: &str,
        output: ResultMap,
        resolved_params: Params,
        started_at: DateTime<Utc>,
    ) -> Self {
        let success = is_success(&output);
        let error = if success {
            None
        } else {
            Some(error_message(&output).unwrap_or_else(|| "unknown error".into()))
        };
        Self {
            step_id: step_id.to_owned(),
            success,
            output,
            error,
            resolved_params,
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Record a step that produced no result.
    pub(crate) fn failed(
        step_id: &str,
        error: impl ToString,
        resolved_params: Params,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            step_id: step_id.to_owned(),
            success: false,
            output: ResultMap::new(),
            error: Some(error.to_string()),
            resolved_params,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Top-level result of [`crate::WorkflowRun::execute`].
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub workflow: String,
    pub mode: RunMode,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Step id → record, for every step that ran.
    pub steps: BTreeMap<String, StepRecord>,
    /// Persistent triggers now listening (reactive runs only).
    pub active_triggers: Vec<String>,
    /// Actions each event re-runs (reactive runs only).
    pub managed_actions: Vec<String>,
    pub context: ContextSnapshot,
}

/// One callback-driven pass over the actions of a reactive run.
#[derive(Debug, Clone, Serialize)]
pub struct CycleRecord {
    pub trigger: String,
    /// 1-based, counted across all triggers of the run.
    pub cycle: u64,
    pub success: bool,
    /// Set when a fault ended the cycle early.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub steps: Vec<StepRecord>,
}
