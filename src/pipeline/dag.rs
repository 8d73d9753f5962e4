// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! DAG (Directed Acyclic Graph) builder for step dependencies
//!
//! Builds and validates dependency graphs for pipeline steps,
//! ensuring proper execution order and detecting cycles.

use petgraph::algo::{has_path_connecting, tarjan_scc};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{BTreeSet, HashMap};

use crate::errors::GraphError;
use crate::pipeline::Pipeline;

/// Builder for step dependency DAGs
///
/// Node indices follow declaration order, which is what makes the
/// topological order deterministic.
#[derive(Debug)]
pub struct DagBuilder {
    graph: DiGraph<usize, ()>,
    name_to_index: HashMap<String, NodeIndex>,
    names: Vec<String>,
}

impl DagBuilder {
    /// Build a DAG from a pipeline
    pub fn build(pipeline: &Pipeline) -> Result<Self, GraphError> {
        let mut builder = Self {
            graph: DiGraph::new(),
            name_to_index: HashMap::new(),
            names: Vec::with_capacity(pipeline.steps.len()),
        };

        // Add all steps as nodes
        for (idx, step) in pipeline.steps.iter().enumerate() {
            if builder.name_to_index.contains_key(&step.name) {
                return Err(GraphError::DuplicateName {
                    name: step.name.clone(),
                });
            }
            let node = builder.graph.add_node(idx);
            builder.name_to_index.insert(step.name.clone(), node);
            builder.names.push(step.name.clone());
        }

        // Add dependency edges
        for step in &pipeline.steps {
            let step_node = builder.name_to_index[&step.name];

            for dep_name in &step.depends_on {
                let dep_node = builder.name_to_index.get(dep_name).ok_or_else(|| {
                    GraphError::DanglingDependency {
                        step: step.name.clone(),
                        dependency: dep_name.clone(),
                    }
                })?;

                if !builder.graph.contains_edge(*dep_node, step_node) {
                    builder.graph.add_edge(*dep_node, step_node, ());
                }
            }
        }

        // Validate no cycles
        builder.kahn_order()?;

        Ok(builder)
    }

    /// Kahn's algorithm, always picking the earliest declared ready step
    fn kahn_order(&self) -> Result<Vec<NodeIndex>, GraphError> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut ready: BTreeSet<NodeIndex> = self
            .graph
            .node_indices()
            .filter(|n| in_degree[n.index()] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.names.len());
        while let Some(node) = ready.pop_first() {
            order.push(node);
            for next in self.graph.neighbors_directed(node, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.insert(next);
                }
            }
        }

        if order.len() == self.names.len() {
            Ok(order)
        } else {
            Err(GraphError::Cycle {
                steps: self.cycle_members(),
            })
        }
    }

    /// Steps of the first strongly connected component that forms a cycle,
    /// with the first member repeated at the end
    fn cycle_members(&self) -> Vec<String> {
        let mut components = tarjan_scc(&self.graph);
        components.iter_mut().for_each(|c| c.sort());
        components.sort();

        let cycle = components.into_iter().find(|component| {
            component.len() > 1
                || (component.len() == 1 && self.graph.contains_edge(component[0], component[0]))
        });

        let Some(cycle) = cycle else {
            return Vec::new();
        };

        let mut members: Vec<String> = cycle.iter().map(|n| self.names[n.index()].clone()).collect();
        members.push(members[0].clone());
        members
    }

    /// Get topologically sorted step indices
    pub fn topological_order(&self) -> Result<Vec<usize>, GraphError> {
        Ok(self
            .kahn_order()?
            .into_iter()
            .map(|n| self.graph[n])
            .collect())
    }

    /// Get topologically sorted step names
    pub fn topological_order_names(&self) -> Result<Vec<String>, GraphError> {
        Ok(self
            .kahn_order()?
            .into_iter()
            .map(|n| self.names[n.index()].clone())
            .collect())
    }

    /// Get dependencies for a step (steps that must run before it)
    pub fn dependencies(&self, step_name: &str) -> Option<Vec<String>> {
        self.neighbors(step_name, Direction::Incoming)
    }

    /// Get dependents for a step (steps that depend on it)
    pub fn dependents(&self, step_name: &str) -> Option<Vec<String>> {
        self.neighbors(step_name, Direction::Outgoing)
    }

    fn neighbors(&self, step_name: &str, direction: Direction) -> Option<Vec<String>> {
        let node = self.name_to_index.get(step_name)?;
        let mut nodes: Vec<NodeIndex> = self.graph.neighbors_directed(*node, direction).collect();
        nodes.sort();
        Some(nodes.into_iter().map(|n| self.names[n.index()].clone()).collect())
    }

    /// Check if step A depends (directly or transitively) on step B
    pub fn depends_on(&self, step_a: &str, step_b: &str) -> bool {
        let Some(node_a) = self.name_to_index.get(step_a) else {
            return false;
        };
        let Some(node_b) = self.name_to_index.get(step_b) else {
            return false;
        };

        node_a != node_b && has_path_connecting(&self.graph, *node_b, *node_a, None)
    }

    /// Generate Mermaid diagram of the DAG
    pub fn to_mermaid(&self) -> String {
        let mut out = String::from("graph TD\n");

        for (idx, name) in self.names.iter().enumerate() {
            out.push_str(&format!("    s{}[\"{}\"]\n", idx, name));
        }

        for (from, to) in self.sorted_edges() {
            out.push_str(&format!("    s{} --> s{}\n", from.index(), to.index()));
        }

        out
    }

    /// Generate DOT diagram of the DAG
    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph pipeline {\n");
        out.push_str("    rankdir=TB;\n");
        out.push_str("    node [shape=box, style=rounded];\n\n");

        for (from, to) in self.sorted_edges() {
            out.push_str(&format!(
                "    \"{}\" -> \"{}\";\n",
                self.names[from.index()],
                self.names[to.index()]
            ));
        }

        // Isolated nodes have no edge to make them appear
        for (name, node) in self.names.iter().zip(self.graph.node_indices()) {
            if self.graph.neighbors_undirected(node).count() == 0 {
                out.push_str(&format!("    \"{}\";\n", name));
            }
        }

        out.push_str("}\n");
        out
    }

    /// Generate text representation of execution order
    pub fn to_text(&self, pipeline: &Pipeline) -> Result<String, GraphError> {
        let order = self.topological_order()?;
        let mut out = String::new();

        for (i, idx) in order.iter().enumerate() {
            let step = &pipeline.steps[*idx];
            let deps = self.dependencies(&step.name).unwrap_or_default();

            out.push_str(&format!("{}. {} ({})", i + 1, step.name, step.entry_point));

            if !deps.is_empty() {
                out.push_str(&format!(" [depends: {}]", deps.join(", ")));
            }

            out.push('\n');
        }

        Ok(out)
    }

    fn sorted_edges(&self) -> Vec<(NodeIndex, NodeIndex)> {
        let mut edges: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .collect();
        edges.sort();
        edges
    }
}
