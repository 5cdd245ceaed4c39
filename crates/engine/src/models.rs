//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a workflow looks like in
//! memory. They round-trip through the JSON documents kept by the `store`
//! crate (`{"name": .., "components": {step_id: StepConfig}}`).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use components::Params;

use crate::error::ConstructionError;

// ---------------------------------------------------------------------------
// StepConfig
// ---------------------------------------------------------------------------

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    /// Registered component type name.
    pub component: String,
    /// Setup profile applied to third-party components (`"default"` if unset).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Free-form parameters; string values may embed `{{alias}}` placeholders.
    #[serde(default)]
    pub config: Params,
    /// Producer-local result key → context-global alias.
    #[serde(default)]
    pub output_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub is_trigger: bool,
}

impl StepConfig {
    /// An ordinary action step.
    pub fn action(component: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            setup_name: None,
            action_type: Some(action_type.into()),
            event_type: None,
            config: Params::new(),
            output_mapping: BTreeMap::new(),
            is_trigger: false,
        }
    }

    /// A trigger step. Without a `timeout` parameter it listens persistently.
    pub fn trigger(component: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            setup_name: None,
            action_type: None,
            event_type: Some(event_type.into()),
            config: Params::new(),
            output_mapping: BTreeMap::new(),
            is_trigger: true,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Publish result key `key` into the context as `alias`.
    pub fn with_output(mut self, key: impl Into<String>, alias: impl Into<String>) -> Self {
        self.output_mapping.insert(key.into(), alias.into());
        self
    }

    pub fn with_setup(mut self, profile: impl Into<String>) -> Self {
        self.setup_name = Some(profile.into());
        self
    }

    /// Aliases this step publishes into the shared context.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.output_mapping.values().map(String::as_str)
    }

    /// Enforce the action/event invariant and classify the step.
    pub fn classify(&self, step_id: &str) -> Result<StepClass, ConstructionError> {
        let invalid = |reason: String| ConstructionError::InvalidStep {
            step_id: step_id.to_owned(),
            reason,
        };

        match (self.is_trigger, &self.action_type, &self.event_type) {
            (true, None, Some(_)) => match trigger_timeout(&self.config).map_err(invalid)? {
                None => Ok(StepClass::PersistentTrigger),
                Some(timeout) => Ok(StepClass::OneShotTrigger(timeout)),
            },
            (true, _, None) => Err(invalid("a trigger must declare an event_type".into())),
            (false, Some(_), None) => Ok(StepClass::Action),
            (false, _, Some(_)) => Err(invalid(
                "event_type is only allowed on steps with is_trigger = true".into(),
            )),
            (false, None, None) => Err(invalid("an action must declare an action_type".into())),
            (true, Some(_), Some(_)) => Err(invalid(
                "a step declares exactly one of action_type and event_type".into(),
            )),
        }
    }
}

/// `None` means "listen forever": the `timeout` parameter is missing, null,
/// or negative. Otherwise it is a number of seconds (fractions allowed).
fn trigger_timeout(config: &Params) -> Result<Option<Duration>, String> {
    let seconds = match config.get("timeout") {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match seconds {
        Some(s) if s.is_finite() && s < 0.0 => Ok(None),
        Some(s) if s.is_finite() => Duration::try_from_secs_f64(s)
            .map(Some)
            .map_err(|_| format!("timeout of {s} seconds is out of range")),
        _ => Err(format!(
            "timeout must be a number of seconds, got {}",
            config.get("timeout").map(Value::to_string).unwrap_or_default()
        )),
    }
}

// ---------------------------------------------------------------------------
// StepClass
// ---------------------------------------------------------------------------

/// Run-time role of a step, fixed when a run is instantiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepClass {
    /// Event step with no finite timeout; makes the whole run reactive.
    PersistentTrigger,
    /// Event step waited on once, for at most the given duration.
    OneShotTrigger(Duration),
    /// Ordinary action.
    Action,
}

impl StepClass {
    pub fn is_trigger(self) -> bool {
        !matches!(self, Self::Action)
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// A complete workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    /// Step id → configuration. Ordered so iteration is deterministic.
    #[serde(rename = "components", default)]
    pub steps: BTreeMap<String, StepConfig>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: BTreeMap::new(),
        }
    }

    pub fn with_step(mut self, step_id: impl Into<String>, step: StepConfig) -> Self {
        self.steps.insert(step_id.into(), step);
        self
    }

    pub fn from_value(document: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(document)
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}
