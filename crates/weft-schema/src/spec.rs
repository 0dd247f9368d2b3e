use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use weft_types::{Secrets, WeftError};

/// Canvas position. Display-only; analysis and execution ignore it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A node as it arrives from the canvas.
///
/// Canvas bookkeeping fields (`width`, `selected`, `dragging`, ...) are
/// accepted and dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            position: Position::default(),
            data: Map::new(),
        }
    }

    /// Builder-style setter for a `data` entry.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// A `data` entry as a string. Numbers and booleans are rendered.
    pub fn str_field(&self, key: &str) -> Option<String> {
        match self.data.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Like [`str_field`](Self::str_field) but blank strings fall back to `default`.
    pub fn str_or(&self, key: &str, default: &str) -> String {
        self.str_field(key)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    /// User-added input handle names (`data.extraInputs`).
    pub fn extra_inputs(&self) -> &[Value] {
        self.handle_list("extraInputs")
    }

    /// User-added output handle names (`data.extraOutputs`).
    pub fn extra_outputs(&self) -> &[Value] {
        self.handle_list("extraOutputs")
    }

    fn handle_list(&self, key: &str) -> &[Value] {
        match self.data.get(key) {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        }
    }

    /// Whether the node gates the run on human approval.
    pub fn requires_approval(&self) -> bool {
        match self.data.get("require_approval") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeSpec {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(rename = "sourceHandle", default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(rename = "targetHandle", default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl EdgeSpec {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: format!("{source}-{target}"),
            source,
            target,
            source_handle: None,
            target_handle: None,
        }
    }

    pub fn with_target_handle(mut self, handle: impl Into<String>) -> Self {
        self.target_handle = Some(handle.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Request envelopes
// ---------------------------------------------------------------------------

fn default_pipeline_name() -> String {
    "Untitled Pipeline".to_string()
}

/// A named graph, as saved and as submitted for analysis/validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineData {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    #[serde(default = "default_pipeline_name")]
    pub name: String,
}

impl PipelineData {
    pub fn new(nodes: Vec<NodeSpec>, edges: Vec<EdgeSpec>) -> Self {
        Self {
            nodes,
            edges,
            name: default_pipeline_name(),
        }
    }
}

/// Input to a streaming execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub edges: Vec<EdgeSpec>,
    #[serde(default)]
    pub pipeline_id: Option<String>,
    #[serde(default)]
    pub resume_node_id: Option<String>,
    #[serde(default)]
    pub user_input: Option<String>,
    #[serde(default, skip_serializing)]
    pub env: Secrets,
}

impl ExecuteRequest {
    pub fn new(nodes: Vec<NodeSpec>, edges: Vec<EdgeSpec>) -> Self {
        Self {
            nodes,
            edges,
            ..Self::default()
        }
    }

    pub fn with_pipeline_id(mut self, id: impl Into<String>) -> Self {
        self.pipeline_id = Some(id.into());
        self
    }

    pub fn resume(mut self, node_id: impl Into<String>, user_input: Option<String>) -> Self {
        self.resume_node_id = Some(node_id.into());
        self.user_input = user_input;
        self
    }

    pub fn with_env(mut self, env: Secrets) -> Self {
        self.env = env;
        self
    }
}

// ---------------------------------------------------------------------------
// LayoutDirection
// ---------------------------------------------------------------------------

/// Auto-layout flow direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayoutDirection {
    /// Layers advance left to right.
    #[default]
    LR,
    /// Layers advance top to bottom.
    TB,
}

impl FromStr for LayoutDirection {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "LR" => Ok(LayoutDirection::LR),
            "TB" => Ok(LayoutDirection::TB),
            other => Err(WeftError::Validation(format!(
                "direction must be 'LR' or 'TB', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for LayoutDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutDirection::LR => f.write_str("LR"),
            LayoutDirection::TB => f.write_str("TB"),
        }
    }
}
