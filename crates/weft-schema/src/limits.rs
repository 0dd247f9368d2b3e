//! Boundary size checks applied before a graph reaches the engine.

use weft_types::{Result, WeftError};

use crate::{EdgeSpec, NodeSpec, PipelineData};

pub const MAX_NODES: usize = 1000;
pub const MAX_EDGES: usize = 5000;
pub const MAX_NAME_CHARS: usize = 200;

fn check(what: &str, actual: usize, max: usize) -> Result<()> {
    if actual > max {
        return Err(WeftError::LimitExceeded {
            what: what.to_string(),
            actual,
            max,
        });
    }
    Ok(())
}

/// Reject node/edge lists larger than the engine accepts.
pub fn check_graph_limits(nodes: &[NodeSpec], edges: &[EdgeSpec]) -> Result<()> {
    check("nodes", nodes.len(), MAX_NODES)?;
    check("edges", edges.len(), MAX_EDGES)
}

impl PipelineData {
    pub fn check_limits(&self) -> Result<()> {
        check_graph_limits(&self.nodes, &self.edges)?;
        check("name characters", self.name.chars().count(), MAX_NAME_CHARS)
    }
}
