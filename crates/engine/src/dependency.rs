//! Dependency inference: which steps must run before which.
//!
//! The default [`PlaceholderInference`] reads `{{alias}}` tokens out of every
//! step's parameters and links each token to the steps whose
//! `output_mapping` publishes that alias. The scheduler only ever sees the
//! resulting [`DependencyGraph`], so a stricter producer/consumer model can
//! be plugged in through [`DependencyInference`] without touching it.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use components::placeholder;

use crate::models::StepConfig;

/// Step id → ids of the steps it depends on.
pub type DependencyRelation = BTreeMap<String, BTreeSet<String>>;

/// The derived "depends-on" relation for one workflow.
///
/// Every step of the workflow is a key, including steps with no
/// dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    relation: DependencyRelation,
    ambiguous: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Build a graph from an explicit relation. Steps mentioned only as a
    /// dependency are added as keys.
    pub fn from_relation(mut relation: DependencyRelation) -> Self {
        let referenced: Vec<String> = relation.values().flatten().cloned().collect();
        for step in referenced {
            relation.entry(step).or_default();
        }
        Self {
            relation,
            ambiguous: BTreeMap::new(),
        }
    }

    pub fn relation(&self) -> &DependencyRelation {
        &self.relation
    }

    pub fn dependencies_of(&self, step_id: &str) -> Option<&BTreeSet<String>> {
        self.relation.get(step_id)
    }

    pub fn depends_on(&self, step_id: &str, other: &str) -> bool {
        self.relation
            .get(step_id)
            .is_some_and(|deps| deps.contains(other))
    }

    pub fn steps(&self) -> impl Iterator<Item = &str> {
        self.relation.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.relation.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relation.is_empty()
    }

    /// Aliases published by more than one step, with their producers.
    ///
    /// A consumer of such an alias depends on every producer; at run time the
    /// context keeps whichever producer wrote last.
    pub fn ambiguous_aliases(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.ambiguous
    }
}

/// Strategy that derives a [`DependencyGraph`] from a workflow's steps.
pub trait DependencyInference: Send + Sync {
    fn infer(&self, steps: &BTreeMap<String, StepConfig>) -> DependencyGraph;
}

/// Infers edges from `{{alias}}` placeholders (searched recursively through
/// nested parameter values). Tokens no other step produces are treated as
/// external references and create no edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderInference;

impl DependencyInference for PlaceholderInference {
    fn infer(&self, steps: &BTreeMap<String, StepConfig>) -> DependencyGraph {
        let mut producers: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (step_id, step) in steps {
            for alias in step.aliases() {
                producers.entry(alias).or_default().insert(step_id.as_str());
            }
        }

        let ambiguous: BTreeMap<String, BTreeSet<String>> = producers
            .iter()
            .filter(|(_, owners)| owners.len() > 1)
            .map(|(alias, owners)| {
                warn!(
                    alias,
                    producers = ?owners,
                    "alias is published by more than one step; consumers depend on all of them"
                );
                (
                    (*alias).to_owned(),
                    owners.iter().map(|s| (*s).to_owned()).collect(),
                )
            })
            .collect();

        let mut relation = DependencyRelation::new();
        for (step_id, step) in steps {
            let deps = relation.entry(step_id.clone()).or_default();
            for token in step.config.values().flat_map(placeholder::references_in_value) {
                match producers.get(token) {
                    Some(owners) => deps.extend(
                        owners
                            .iter()
                            .filter(|owner| **owner != step_id.as_str())
                            .map(|owner| (*owner).to_owned()),
                    ),
                    None => debug!(step_id = %step_id, token, "placeholder has no producer"),
                }
            }
        }

        DependencyGraph {
            relation,
            ambiguous,
        }
    }
}
