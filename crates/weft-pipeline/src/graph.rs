use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use weft_schema::{EdgeSpec, NodeSpec};
use weft_types::{Result, WeftError};

/// In-memory directed graph built fresh from a node/edge list.
///
/// Nodes keep their input order; that order is the tie-break for every
/// ordering the engine produces. Parallel edges between the same ordered
/// pair collapse to one. Self-loops are kept and make the graph cyclic.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    nodes: Vec<NodeSpec>,
    index: HashMap<String, usize>,
    edges: Vec<PipelineEdge>,
    successors: Vec<Vec<usize>>,
    predecessors: Vec<Vec<usize>>,
    /// Edge positions into `edges`, per target node, in input order.
    incoming: Vec<Vec<usize>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineEdge {
    pub source: usize,
    pub target: usize,
    pub source_handle: Option<String>,
    pub target_handle: Option<String>,
}

impl PipelineGraph {
    /// Build a graph. Fails only on duplicate node ids; edges whose
    /// endpoints are missing are dropped.
    pub fn build(nodes: &[NodeSpec], edges: &[EdgeSpec]) -> Result<Self> {
        let mut index = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.id.clone(), i).is_some() {
                return Err(WeftError::DuplicateNode(node.id.clone()));
            }
        }

        let n = nodes.len();
        let mut graph = Self {
            nodes: nodes.to_vec(),
            index,
            edges: Vec::with_capacity(edges.len()),
            successors: vec![Vec::new(); n],
            predecessors: vec![Vec::new(); n],
            incoming: vec![Vec::new(); n],
        };

        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        for edge in edges {
            let (Some(&source), Some(&target)) =
                (graph.index.get(&edge.source), graph.index.get(&edge.target))
            else {
                tracing::debug!(
                    edge = %edge.id,
                    source = %edge.source,
                    target = %edge.target,
                    "Dropping edge with unknown endpoint"
                );
                continue;
            };
            if !seen.insert((source, target)) {
                continue;
            }
            graph.successors[source].push(target);
            graph.predecessors[target].push(source);
            graph.incoming[target].push(graph.edges.len());
            graph.edges.push(PipelineEdge {
                source,
                target,
                source_handle: edge.source_handle.clone(),
                target_handle: edge.target_handle.clone(),
            });
        }

        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[NodeSpec] {
        &self.nodes
    }

    pub fn node_at(&self, idx: usize) -> &NodeSpec {
        &self.nodes[idx]
    }

    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.index_of(id).map(|i| &self.nodes[i])
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn edges(&self) -> &[PipelineEdge] {
        &self.edges
    }

    pub fn predecessors(&self, idx: usize) -> &[usize] {
        &self.predecessors[idx]
    }

    pub fn successors(&self, idx: usize) -> &[usize] {
        &self.successors[idx]
    }

    /// Edges arriving at `idx`, in input order.
    pub fn incoming(&self, idx: usize) -> impl Iterator<Item = &PipelineEdge> {
        self.incoming[idx].iter().map(|&e| &self.edges[e])
    }

    pub fn in_degree(&self, idx: usize) -> usize {
        self.predecessors[idx].len()
    }

    pub fn out_degree(&self, idx: usize) -> usize {
        self.successors[idx].len()
    }

    /// Total degree. A self-loop counts twice.
    pub fn degree(&self, idx: usize) -> usize {
        self.in_degree(idx) + self.out_degree(idx)
    }

    /// Kahn's algorithm. Among ready nodes the one earliest in the input
    /// list goes first. Returns `None` when the graph has a cycle.
    pub fn topological_order(&self) -> Option<Vec<usize>> {
        let mut remaining: Vec<usize> = (0..self.len()).map(|i| self.in_degree(i)).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = remaining
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();

        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for &next in &self.successors[idx] {
                remaining[next] -= 1;
                if remaining[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        (order.len() == self.len()).then_some(order)
    }

    pub fn is_acyclic(&self) -> bool {
        self.topological_order().is_some()
    }

    /// Number of weakly connected components (edge direction ignored).
    pub fn weak_components(&self) -> usize {
        let mut parent: Vec<usize> = (0..self.len()).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        let mut components = self.len();
        for edge in &self.edges {
            let a = find(&mut parent, edge.source);
            let b = find(&mut parent, edge.target);
            if a != b {
                parent[a] = b;
                components -= 1;
            }
        }
        components
    }

    /// Node ids for a list of indices.
    pub fn ids(&self, indices: &[usize]) -> Vec<String> {
        indices.iter().map(|&i| self.nodes[i].id.clone()).collect()
    }
}
