//! Scheduler: turn a dependency relation into one linear execution order.
//!
//! Kahn's algorithm. Among steps that are ready at the same time the
//! smallest step id goes first, so a fixed workflow always yields the same
//! order. A relation that cannot be fully ordered is a hard construction
//! error; no partial order is returned.

use std::collections::{BTreeMap, BTreeSet};

use crate::dependency::DependencyGraph;
use crate::error::ConstructionError;

/// Return every step of `graph` so that each step follows all of its
/// dependencies.
///
/// # Errors
/// [`ConstructionError::CircularDependency`] naming the steps that could not
/// be placed.
pub fn topological_order(graph: &DependencyGraph) -> Result<Vec<String>, ConstructionError> {
    // -----------------------------------------------------------------------
    // In-degree = number of known dependencies; reverse edges for decrements.
    // -----------------------------------------------------------------------
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

    for (step, deps) in graph.relation() {
        let known = deps
            .iter()
            .filter(|d| graph.dependencies_of(d).is_some())
            .inspect(|d| dependents.entry(d.as_str()).or_default().push(step.as_str()))
            .count();
        in_degree.insert(step.as_str(), known);
    }

    // -----------------------------------------------------------------------
    // Drain the ready set in id order.
    // -----------------------------------------------------------------------
    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(graph.len());

    while let Some(step) = ready.pop_first() {
        sorted.push(step.to_owned());

        for &dependent in dependents.get(step).into_iter().flatten() {
            if let Some(deg) = in_degree.get_mut(dependent) {
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if sorted.len() != graph.len() {
        let steps = in_degree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(id, _)| id.to_owned())
            .collect();
        return Err(ConstructionError::CircularDependency { steps });
    }

    Ok(sorted)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::DependencyRelation;

    fn graph(edges: &[(&str, &[&str])]) -> DependencyGraph {
        let relation: DependencyRelation = edges
            .iter()
            .map(|(step, deps)| {
                (
                    (*step).to_owned(),
                    deps.iter().map(|d| (*d).to_owned()).collect(),
                )
            })
            .collect();
        DependencyGraph::from_relation(relation)
    }

    fn assert_respects(order: &[String], g: &DependencyGraph) {
        let position = |id: &str| order.iter().position(|s| s == id).unwrap();
        for (step, deps) in g.relation() {
            for dep in deps {
                assert!(
                    position(dep) < position(step),
                    "{dep} must run before {step} in {order:?}"
                );
            }
        }
    }

    #[test]
    fn linear_chain_is_ordered() {
        // c depends on b depends on a
        let g = graph(&[("c", &["b"]), ("b", &["a"]), ("a", &[])]);
        assert_eq!(topological_order(&g).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn diamond_respects_every_edge() {
        //   a
        //  / \
        // b   c
        //  \ /
        //   d
        let g = graph(&[("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"]), ("a", &[])]);
        let order = topological_order(&g).unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
        assert_respects(&order, &g);
    }

    #[test]
    fn ties_break_by_step_id_not_insertion() {
        let g = graph(&[("zeta", &[]), ("alpha", &[]), ("mid", &["zeta"])]);
        assert_eq!(topological_order(&g).unwrap(), vec!["alpha", "zeta", "mid"]);
    }

    #[test]
    fn three_step_cycle_is_rejected() {
        // A←C, B←A, C←B
        let g = graph(&[("a", &["c"]), ("b", &["a"]), ("c", &["b"])]);
        assert_eq!(
            topological_order(&g),
            Err(ConstructionError::CircularDependency {
                steps: vec!["a".into(), "b".into(), "c".into()]
            })
        );
    }

    #[test]
    fn cycle_report_excludes_placeable_steps() {
        let g = graph(&[("free", &[]), ("x", &["y"]), ("y", &["x"])]);
        match topological_order(&g) {
            Err(ConstructionError::CircularDependency { steps }) => assert_eq!(steps, vec!["x", "y"]),
            other => panic!("expected a cycle, got {other:?}"),
        }
    }

    #[test]
    fn single_step_is_valid() {
        let g = graph(&[("solo", &[])]);
        assert_eq!(topological_order(&g).unwrap(), vec!["solo"]);
    }
}
