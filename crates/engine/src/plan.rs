//! Execution plan: everything about a run that is fixed before it starts.

use std::collections::BTreeMap;

use tracing::info;

use crate::dag::topological_order;
use crate::dependency::{DependencyGraph, DependencyInference, PlaceholderInference};
use crate::error::ConstructionError;
use crate::models::{StepClass, WorkflowDefinition};
use crate::report::RunMode;

/// Classification, dependency relation and execution order of a workflow.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    order: Vec<String>,
    graph: DependencyGraph,
    classes: BTreeMap<String, StepClass>,
}

impl ExecutionPlan {
    /// Validate `definition` and order its steps with the placeholder
    /// dependency model.
    pub fn build(definition: &WorkflowDefinition) -> Result<Self, ConstructionError> {
        Self::build_with(definition, &PlaceholderInference)
    }

    /// # Errors
    /// - [`ConstructionError::EmptyWorkflow`] for a workflow without steps.
    /// - [`ConstructionError::InvalidStep`] if a step breaks the
    ///   action/event invariant or carries an unusable timeout.
    /// - [`ConstructionError::CircularDependency`] if the steps cannot be ordered.
    pub fn build_with(
        definition: &WorkflowDefinition,
        inference: &dyn DependencyInference,
    ) -> Result<Self, ConstructionError> {
        if definition.steps.is_empty() {
            return Err(ConstructionError::EmptyWorkflow(definition.name.clone()));
        }

        let classes = definition
            .steps
            .iter()
            .map(|(id, step)| Ok((id.clone(), step.classify(id)?)))
            .collect::<Result<BTreeMap<_, _>, ConstructionError>>()?;

        let graph = inference.infer(&definition.steps);
        let order = topological_order(&graph)?;
        info!(
            workflow = %definition.name,
            "dependencies resolved, {} steps in order: {:?}",
            order.len(),
            order
        );

        Ok(Self {
            order,
            graph,
            classes,
        })
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn dependencies(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn class_of(&self, step_id: &str) -> Option<StepClass> {
        self.classes.get(step_id).copied()
    }

    /// Reactive as soon as one persistent trigger exists.
    pub fn mode(&self) -> RunMode {
        if self
            .classes
            .values()
            .any(|c| *c == StepClass::PersistentTrigger)
        {
            RunMode::Reactive
        } else {
            RunMode::Batch
        }
    }

    /// Steps of the given class, in execution order.
    fn in_order(&self, keep: impl Fn(StepClass) -> bool) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| self.classes.get(id.as_str()).copied().is_some_and(&keep))
            .map(String::as_str)
            .collect()
    }

    pub fn persistent_triggers(&self) -> Vec<&str> {
        self.in_order(|c| c == StepClass::PersistentTrigger)
    }

    pub fn one_shot_triggers(&self) -> Vec<&str> {
        self.in_order(|c| matches!(c, StepClass::OneShotTrigger(_)))
    }

    /// Ordinary actions: the steps a reactive cycle re-runs.
    pub fn actions(&self) -> Vec<&str> {
        self.in_order(|c| c == StepClass::Action)
    }
}
