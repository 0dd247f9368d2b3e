use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use weft_schema::{EdgeSpec, LayoutDirection, NodeSpec, Position};

use crate::graph::PipelineGraph;

/// Horizontal pitch: assumed node width plus gap.
pub const NODE_WIDTH: f64 = 300.0;
/// Vertical pitch: assumed node height plus gap.
pub const NODE_HEIGHT: f64 = 180.0;
pub const MARGIN: f64 = 60.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodePosition {
    pub id: String,
    pub position: Position,
}

/// Longest-path layering. A node's layer is one past its deepest
/// predecessor; rows within a layer follow input order. Cyclic or
/// unbuildable graphs fall back to one node per layer in input order.
pub fn auto_layout(
    nodes: &[NodeSpec],
    edges: &[EdgeSpec],
    direction: LayoutDirection,
) -> Vec<NodePosition> {
    let layers = match PipelineGraph::build(nodes, edges) {
        Ok(graph) => longest_path_layers(&graph).unwrap_or_else(|| fallback_layers(nodes.len())),
        Err(e) => {
            tracing::debug!(error = %e, "Layout falling back to row layout");
            fallback_layers(nodes.len())
        }
    };

    let mut grouped: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (idx, &layer) in layers.iter().enumerate() {
        grouped.entry(layer).or_default().push(idx);
    }

    let mut positioned = Vec::with_capacity(nodes.len());
    for (layer, members) in grouped {
        for (row, idx) in members.into_iter().enumerate() {
            let (layer, row) = (layer as f64, row as f64);
            let (x, y) = match direction {
                LayoutDirection::LR => (layer * NODE_WIDTH, row * NODE_HEIGHT),
                LayoutDirection::TB => (row * NODE_WIDTH, layer * NODE_HEIGHT),
            };
            positioned.push(NodePosition {
                id: nodes[idx].id.clone(),
                position: Position {
                    x: x + MARGIN,
                    y: y + MARGIN,
                },
            });
        }
    }
    positioned
}

/// Layer per node index, or `None` when the graph has a cycle.
fn longest_path_layers(graph: &PipelineGraph) -> Option<Vec<usize>> {
    let order = graph.topological_order()?;
    let mut layer = vec![0usize; graph.len()];
    for v in order {
        layer[v] = graph
            .predecessors(v)
            .iter()
            .map(|&u| layer[u] + 1)
            .max()
            .unwrap_or(0);
    }
    Some(layer)
}

fn fallback_layers(n: usize) -> Vec<usize> {
    (0..n).collect()
}
