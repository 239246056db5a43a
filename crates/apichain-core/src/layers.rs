//! Dependency layering of operations.
//!
//! Operations are grouped so that each one depends only on producers in
//! earlier layers. Mutually dependent operations (strongly connected
//! components) are collapsed and share a layer.

use indexmap::IndexMap;
use petgraph::algo::condensation;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::graph::DependencyGraph;

/// Operation labels grouped into execution layers.
///
/// Layer 0 holds operations with no producers; layer N depends only on
/// layers `< N`. Each layer is sorted. Returns `None` when the graph has no
/// producer -> consumer dependencies at all.
pub fn compute_dependency_layers(graph: &DependencyGraph) -> Option<Vec<Vec<String>>> {
    // Node `i` is the `i`-th operation of the graph.
    let mut dag: DiGraph<String, ()> = DiGraph::new();
    for label in graph.operations.keys() {
        dag.add_node(label.clone());
    }

    let mut producers: IndexMap<&str, Vec<NodeIndex>> = IndexMap::new();
    for (idx, node) in graph.operations.values().enumerate() {
        for output in &node.outputs {
            producers
                .entry(output.resource.as_str())
                .or_default()
                .push(NodeIndex::new(idx));
        }
    }

    let mut has_dependencies = false;
    for (idx, node) in graph.operations.values().enumerate() {
        let consumer = NodeIndex::new(idx);
        for input in &node.inputs {
            let Some(sources) = producers.get(input.resource.as_str()) else {
                continue;
            };
            for &producer in sources {
                if producer != consumer && !dag.contains_edge(producer, consumer) {
                    dag.add_edge(producer, consumer, ());
                    has_dependencies = true;
                }
            }
        }
    }
    if !has_dependencies {
        return None;
    }

    let condensed = condensation(dag, true);
    let mut in_degree: Vec<usize> = condensed
        .node_indices()
        .map(|component| condensed.neighbors_directed(component, Direction::Incoming).count())
        .collect();
    let mut current: Vec<NodeIndex> = condensed
        .node_indices()
        .filter(|component| in_degree[component.index()] == 0)
        .collect();

    let mut layers = Vec::new();
    while !current.is_empty() {
        let mut layer = Vec::new();
        let mut next = Vec::new();
        for &component in &current {
            layer.extend(condensed[component].iter().cloned());
            for successor in condensed.neighbors_directed(component, Direction::Outgoing) {
                in_degree[successor.index()] -= 1;
                if in_degree[successor.index()] == 0 {
                    next.push(successor);
                }
            }
        }
        layer.sort();
        layers.push(layer);
        current = next;
    }
    Some(layers)
}
