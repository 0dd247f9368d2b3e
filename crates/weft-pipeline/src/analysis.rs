use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use weft_schema::{EdgeSpec, NodeSpec};

use crate::graph::PipelineGraph;

pub const INPUT_NODE_TYPE: &str = "customInput";
pub const OUTPUT_NODE_TYPE: &str = "customOutput";

/// Structural metrics for one pipeline graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub num_nodes: usize,
    pub num_edges: usize,
    pub is_dag: bool,
    pub node_type_counts: BTreeMap<String, usize>,
    pub source_nodes: Vec<String>,
    pub sink_nodes: Vec<String>,
    pub isolated_nodes: Vec<String>,
    pub connected_components: usize,
    /// Edges on the longest directed path; `-1` when the graph is cyclic.
    pub longest_path: i64,
    pub has_input_node: bool,
    pub has_output_node: bool,
    pub warnings: Vec<String>,
    pub execution_plan: Vec<String>,
}

/// Analyze a node/edge list. Never fails: a graph that cannot be built is
/// reported as a non-DAG with empty derived fields and a warning.
pub fn analyze(nodes: &[NodeSpec], edges: &[EdgeSpec]) -> AnalysisReport {
    let mut node_type_counts = BTreeMap::new();
    for node in nodes {
        *node_type_counts.entry(node.node_type.clone()).or_insert(0) += 1;
    }
    let has_input_node = nodes.iter().any(|n| n.node_type == INPUT_NODE_TYPE);
    let has_output_node = nodes.iter().any(|n| n.node_type == OUTPUT_NODE_TYPE);

    let mut report = AnalysisReport {
        num_nodes: nodes.len(),
        num_edges: edges.len(),
        is_dag: false,
        node_type_counts,
        source_nodes: Vec::new(),
        sink_nodes: Vec::new(),
        isolated_nodes: Vec::new(),
        connected_components: 0,
        longest_path: -1,
        has_input_node,
        has_output_node,
        warnings: Vec::new(),
        execution_plan: Vec::new(),
    };

    let graph = match PipelineGraph::build(nodes, edges) {
        Ok(graph) => graph,
        Err(e) => {
            tracing::debug!(error = %e, "Analysis on unbuildable graph");
            report.warnings.push(format!("Graph could not be built: {}", e));
            return report;
        }
    };

    for idx in 0..graph.len() {
        let id = graph.node_at(idx).id.clone();
        match (graph.in_degree(idx), graph.out_degree(idx)) {
            (0, 0) => report.isolated_nodes.push(id),
            (0, _) => report.source_nodes.push(id),
            (_, 0) => report.sink_nodes.push(id),
            _ => {}
        }
    }
    report.connected_components = graph.weak_components();

    if let Some(order) = graph.topological_order() {
        report.is_dag = true;
        report.longest_path = longest_path(&graph, &order);
        report.execution_plan = graph.ids(&order);
    }

    report.warnings = structural_warnings(&report);
    report
}

/// Longest path in edges over a topological order.
fn longest_path(graph: &PipelineGraph, order: &[usize]) -> i64 {
    let mut dist = vec![0i64; graph.len()];
    for &v in order {
        dist[v] = graph
            .predecessors(v)
            .iter()
            .map(|&u| dist[u] + 1)
            .max()
            .unwrap_or(0);
    }
    dist.into_iter().max().unwrap_or(0)
}

fn structural_warnings(report: &AnalysisReport) -> Vec<String> {
    let mut warnings = Vec::new();
    if !report.has_input_node {
        warnings.push("No Input node found — pipeline has no entry point.".to_string());
    }
    if !report.has_output_node {
        warnings.push("No Output node found — pipeline has no exit point.".to_string());
    }
    if !report.is_dag {
        warnings.push("Pipeline contains cycles — it is NOT a valid DAG.".to_string());
    }
    if !report.isolated_nodes.is_empty() {
        warnings.push(format!(
            "{} node(s) have no connections: {}",
            report.isolated_nodes.len(),
            report.isolated_nodes.join(", ")
        ));
    }
    if report.connected_components > 1 {
        warnings.push(format!(
            "Pipeline has {} disconnected sub-graphs.",
            report.connected_components
        ));
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(specs: &[(&str, &str)]) -> Vec<NodeSpec> {
        specs.iter().map(|(id, ty)| NodeSpec::new(*id, *ty)).collect()
    }

    fn edges(pairs: &[(&str, &str)]) -> Vec<EdgeSpec> {
        pairs.iter().map(|(s, t)| EdgeSpec::new(*s, *t)).collect()
    }

    #[test]
    fn linear_pipeline() {
        let n = nodes(&[("A", "customInput"), ("B", "llm"), ("C", "customOutput")]);
        let e = edges(&[("A", "B"), ("B", "C")]);
        let report = analyze(&n, &e);

        assert!(report.is_dag);
        assert_eq!(report.execution_plan, vec!["A", "B", "C"]);
        assert_eq!(report.longest_path, 2);
        assert_eq!(report.source_nodes, vec!["A"]);
        assert_eq!(report.sink_nodes, vec!["C"]);
        assert!(report.isolated_nodes.is_empty());
        assert_eq!(report.connected_components, 1);
        assert_eq!(report.node_type_counts.get("llm"), Some(&1));
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn two_cycle_reports_not_dag() {
        let n = nodes(&[("A", "text"), ("B", "text")]);
        let e = edges(&[("A", "B"), ("B", "A")]);
        let report = analyze(&n, &e);

        assert!(!report.is_dag);
        assert_eq!(report.longest_path, -1);
        assert!(report.execution_plan.is_empty());
        assert!(report.warnings.iter().any(|w| w.contains("cycles")));
    }

    #[test]
    fn isolated_node_is_neither_source_nor_sink() {
        let n = nodes(&[("in", "customInput"), ("out", "customOutput"), ("lonely", "text")]);
        let e = edges(&[("in", "out")]);
        let report = analyze(&n, &e);

        assert_eq!(report.isolated_nodes, vec!["lonely"]);
        assert!(!report.source_nodes.contains(&"lonely".to_string()));
        assert!(!report.sink_nodes.contains(&"lonely".to_string()));
        assert_eq!(report.connected_components, 2);
        assert!(report
            .warnings
            .contains(&"1 node(s) have no connections: lonely".to_string()));
        assert!(report
            .warnings
            .contains(&"Pipeline has 2 disconnected sub-graphs.".to_string()));
    }

    #[test]
    fn single_node_has_zero_longest_path() {
        let report = analyze(&nodes(&[("only", "text")]), &[]);
        assert_eq!(report.longest_path, 0);
        assert_eq!(report.execution_plan, vec!["only"]);
    }

    #[test]
    fn empty_graph() {
        let report = analyze(&[], &[]);
        assert!(report.is_dag);
        assert_eq!(report.longest_path, 0);
        assert_eq!(report.connected_components, 0);
        assert!(report.execution_plan.is_empty());
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn missing_entry_and_exit_warned() {
        let report = analyze(&nodes(&[("t", "text")]), &[]);
        assert!(!report.has_input_node);
        assert!(report.warnings[0].starts_with("No Input node found"));
        assert!(report.warnings[1].starts_with("No Output node found"));
    }

    #[test]
    fn duplicate_ids_degrade_instead_of_failing() {
        let report = analyze(&nodes(&[("a", "text"), ("a", "text")]), &[]);
        assert!(!report.is_dag);
        assert_eq!(report.longest_path, -1);
        assert!(report.source_nodes.is_empty());
        assert!(report.warnings.iter().any(|w| w.starts_with("Graph could not be built")));
    }

    #[test]
    fn analysis_is_deterministic() {
        let n = nodes(&[("d", "text"), ("c", "text"), ("b", "text"), ("a", "text")]);
        let e = edges(&[("d", "a"), ("c", "a"), ("b", "a")]);
        let first = analyze(&n, &e);
        let second = analyze(&n, &e);
        assert_eq!(first, second);
        assert_eq!(first.execution_plan, vec!["d", "c", "b", "a"]);
    }

    #[test]
    fn diamond_longest_path_takes_longest_branch() {
        let n = nodes(&[("a", "text"), ("b", "text"), ("c", "text"), ("d", "text")]);
        let e = edges(&[("a", "b"), ("b", "c"), ("c", "d"), ("a", "d")]);
        let report = analyze(&n, &e);
        assert_eq!(report.longest_path, 3);
    }
}
