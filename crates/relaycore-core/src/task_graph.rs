// Copyright (c) 2025 RelayCore
// SPDX-License-Identifier: Apache-2.0

//! Validates a Task's ordered step list before it is ever enqueued.
//!
//! Steps execute strictly in `step_order` except under a `parallel`
//! composite, whose children fan out concurrently. A `decision` step routes
//! to one of two named branches; this module checks those branches resolve
//! to real steps and don't form a cycle, using the same graph-based
//! validation approach the workflow engine this crate descends from used for
//! its DAG of step dependencies.

use crate::domain::StepSpec;
use crate::error::{OrchestratorError, Result};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::DiGraph;
use std::collections::{HashMap, HashSet};

/// A Task's step list, validated for structural soundness.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    ordered: Vec<(i32, StepSpec)>,
}

impl TaskGraph {
    /// Validates `steps` (already paired with their declared `step_order`)
    /// and returns them sorted by order.
    ///
    /// Checks:
    /// - `step_order` values are unique.
    /// - every `decision` step's `if_true`/`if_false` branch names resolve
    ///   to a step name declared somewhere in the task (top-level or nested
    ///   under a `parallel`).
    /// - the graph formed by decision branches has no cycle.
    /// - a `parallel` step's children have unique names among themselves.
    pub fn build(steps: Vec<(i32, StepSpec)>) -> Result<Self> {
        let mut seen_orders: HashMap<i32, String> = HashMap::new();
        for (order, spec) in &steps {
            if let Some(existing) = seen_orders.insert(*order, spec.name().to_string()) {
                return Err(OrchestratorError::DuplicateStepOrder {
                    order: *order,
                    first: existing,
                    second: spec.name().to_string(),
                });
            }
        }

        let mut known_names: HashSet<&str> = HashSet::new();
        for (_, spec) in &steps {
            collect_names(spec, &mut known_names);
        }

        let mut graph = DiGraph::<&str, ()>::new();
        let mut nodes = HashMap::new();
        for name in &known_names {
            nodes.insert(*name, graph.add_node(*name));
        }

        for (_, spec) in &steps {
            validate_decisions(spec, &known_names, &mut graph, &nodes)?;
        }

        if is_cyclic_directed(&graph) {
            return Err(OrchestratorError::InvalidStepGraph(
                "decision branches form a cycle".to_string(),
            ));
        }

        let mut ordered = steps;
        ordered.sort_by_key(|(order, _)| *order);
        Ok(Self { ordered })
    }

    pub fn steps_in_order(&self) -> impl Iterator<Item = &StepSpec> {
        self.ordered.iter().map(|(_, spec)| spec)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

fn collect_names<'a>(spec: &'a StepSpec, out: &mut HashSet<&'a str>) {
    out.insert(spec.name());
    if let StepSpec::Parallel { children, .. } = spec {
        for child in children {
            collect_names(child, out);
        }
    }
}

fn validate_decisions<'a>(
    spec: &'a StepSpec,
    known: &HashSet<&'a str>,
    graph: &mut DiGraph<&'a str, ()>,
    nodes: &HashMap<&'a str, petgraph::graph::NodeIndex>,
) -> Result<()> {
    match spec {
        StepSpec::Decision {
            name,
            if_true,
            if_false,
            ..
        } => {
            for branch in [if_true.as_str(), if_false.as_str()] {
                if !known.contains(branch) {
                    return Err(OrchestratorError::InvalidStepGraph(format!(
                        "decision step '{name}' branches to unknown step '{branch}'"
                    )));
                }
                graph.add_edge(nodes[name.as_str()], nodes[branch], ());
            }
            Ok(())
        }
        StepSpec::Parallel { children, .. } => {
            let mut child_names = HashSet::new();
            for child in children {
                if !child_names.insert(child.name()) {
                    return Err(OrchestratorError::InvalidStepGraph(format!(
                        "duplicate child step name '{}' under parallel step",
                        child.name()
                    )));
                }
                validate_decisions(child, known, graph, nodes)?;
            }
            Ok(())
        }
        StepSpec::Llm { .. } | StepSpec::Tool { .. } => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm(name: &str) -> StepSpec {
        StepSpec::Llm {
            name: name.to_string(),
            model: "gpt-4".to_string(),
            system_prompt: None,
            prompt: "hi".to_string(),
            context: None,
            max_tokens: None,
            temperature: 0.7,
        }
    }

    #[test]
    fn rejects_duplicate_step_order() {
        let steps = vec![(0, llm("a")), (0, llm("b"))];
        let err = TaskGraph::build(steps).unwrap_err();
        assert!(matches!(err, OrchestratorError::DuplicateStepOrder { .. }));
    }

    #[test]
    fn sorts_by_step_order() {
        let steps = vec![(1, llm("b")), (0, llm("a"))];
        let graph = TaskGraph::build(steps).unwrap();
        let names: Vec<_> = graph.steps_in_order().map(|s| s.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn rejects_decision_cycle() {
        let steps = vec![
            (
                0,
                StepSpec::Decision {
                    name: "d1".to_string(),
                    predicate: "x".to_string(),
                    if_true: "d2".to_string(),
                    if_false: "d2".to_string(),
                },
            ),
            (
                1,
                StepSpec::Decision {
                    name: "d2".to_string(),
                    predicate: "x".to_string(),
                    if_true: "d1".to_string(),
                    if_false: "d1".to_string(),
                },
            ),
        ];
        let err = TaskGraph::build(steps).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStepGraph(_)));
    }

    #[test]
    fn rejects_unknown_branch() {
        let steps = vec![(
            0,
            StepSpec::Decision {
                name: "d1".to_string(),
                predicate: "x".to_string(),
                if_true: "missing".to_string(),
                if_false: "d1".to_string(),
            },
        )];
        let err = TaskGraph::build(steps).unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStepGraph(_)));
    }
}
