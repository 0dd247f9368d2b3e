//! Pipeline validation: per-node rules and the aggregated report.
//!
//! Each rule inspects one node against its [`NodeTypeDescriptor`] and the
//! built graph. `Error` diagnostics make the pipeline invalid; `Warning`
//! diagnostics are advisory. Call [`validate`] with the built-in registry or
//! [`validate_with`] with a custom one.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use weft_schema::{EdgeSpec, NodeSpec};

use crate::graph::PipelineGraph;
use crate::registry::{NodeTypeDescriptor, NodeTypeRegistry};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub rule: &'static str,
    pub severity: Severity,
    pub field: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    fn error(rule: &'static str, field: &str, message: String) -> Self {
        Self {
            rule,
            severity: Severity::Error,
            field: Some(field.to_string()),
            message,
        }
    }

    fn warning(rule: &'static str, message: String) -> Self {
        Self {
            rule,
            severity: Severity::Warning,
            field: None,
            message,
        }
    }
}

/// A blocking problem on one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub node_id: String,
    pub node_type: String,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

/// What a rule sees for one node.
pub struct NodeContext<'a> {
    pub node: &'a NodeSpec,
    pub descriptor: &'a NodeTypeDescriptor,
    pub graph: &'a PipelineGraph,
    pub in_degree: usize,
    pub out_degree: usize,
}

pub trait LintRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, ctx: &NodeContext<'_>) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct RequiredFieldsRule;
impl LintRule for RequiredFieldsRule {
    fn name(&self) -> &'static str {
        "required_fields"
    }
    fn apply(&self, ctx: &NodeContext<'_>) -> Vec<Diagnostic> {
        ctx.descriptor
            .required_fields()
            .filter(|field| is_blank(ctx.node.data.get(&field.name)))
            .map(|field| {
                Diagnostic::error(
                    self.name(),
                    &field.name,
                    format!("Required field '{}' is empty.", field.label),
                )
            })
            .collect()
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(_) => false,
    }
}

fn handle_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("literal pattern"))
}

struct HandleNameRule;
impl LintRule for HandleNameRule {
    fn name(&self) -> &'static str {
        "handle_name"
    }
    fn apply(&self, ctx: &NodeContext<'_>) -> Vec<Diagnostic> {
        let pattern = handle_name_pattern();
        ctx.node
            .extra_inputs()
            .iter()
            .chain(ctx.node.extra_outputs())
            .filter(|h| !h.as_str().is_some_and(|s| pattern.is_match(s)))
            .map(|h| {
                let shown = h.as_str().map(str::to_string).unwrap_or_else(|| h.to_string());
                Diagnostic::warning(
                    self.name(),
                    format!(
                        "Node '{}': extra handle '{}' has an invalid name (use letters, numbers, underscores only).",
                        ctx.node.id, shown
                    ),
                )
            })
            .collect()
    }
}

struct InputLimitRule;
impl LintRule for InputLimitRule {
    fn name(&self) -> &'static str {
        "input_limit"
    }
    fn apply(&self, ctx: &NodeContext<'_>) -> Vec<Diagnostic> {
        let extra = ctx.node.extra_inputs().len();
        match ctx.descriptor.effective_max_inputs(extra) {
            Some(limit) if ctx.in_degree > limit => vec![Diagnostic::warning(
                self.name(),
                format!(
                    "Node '{}' ({}) has {} connections but supports at most {} ({} built-in + {} custom).",
                    ctx.node.id,
                    ctx.node.node_type,
                    ctx.in_degree,
                    limit,
                    ctx.descriptor.max_inputs,
                    extra
                ),
            )],
            _ => Vec::new(),
        }
    }
}

struct OutputLimitRule;
impl LintRule for OutputLimitRule {
    fn name(&self) -> &'static str {
        "output_limit"
    }
    fn apply(&self, ctx: &NodeContext<'_>) -> Vec<Diagnostic> {
        let extra = ctx.node.extra_outputs().len();
        match ctx.descriptor.effective_max_outputs(extra) {
            Some(limit) if ctx.out_degree > limit => vec![Diagnostic::warning(
                self.name(),
                format!(
                    "Node '{}' ({}) has {} outgoing connections but supports at most {}.",
                    ctx.node.id, ctx.node.node_type, ctx.out_degree, limit
                ),
            )],
            _ => Vec::new(),
        }
    }
}

struct DisconnectedRule;
impl LintRule for DisconnectedRule {
    fn name(&self) -> &'static str {
        "disconnected"
    }
    fn apply(&self, ctx: &NodeContext<'_>) -> Vec<Diagnostic> {
        if ctx.graph.len() > 1 && ctx.in_degree + ctx.out_degree == 0 {
            vec![Diagnostic::warning(
                self.name(),
                format!("Node '{}' ({}) is disconnected.", ctx.node.id, ctx.node.node_type),
            )]
        } else {
            Vec::new()
        }
    }
}

/// Rules in the order their diagnostics are reported.
pub fn built_in_rules() -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(RequiredFieldsRule),
        Box::new(HandleNameRule),
        Box::new(InputLimitRule),
        Box::new(OutputLimitRule),
        Box::new(DisconnectedRule),
    ]
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Validate against the built-in node type catalog.
pub fn validate(nodes: &[NodeSpec], edges: &[EdgeSpec]) -> ValidationReport {
    validate_with(NodeTypeRegistry::builtin(), nodes, edges)
}

pub fn validate_with(
    registry: &NodeTypeRegistry,
    nodes: &[NodeSpec],
    edges: &[EdgeSpec],
) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    // Duplicate ids are reported; degree checks use the first occurrence.
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(nodes.len());
    for node in nodes {
        if seen.insert(node.id.as_str()) {
            unique.push(node.clone());
        } else {
            errors.push(ValidationIssue {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
                field: "id".to_string(),
                message: format!("Duplicate node id '{}'.", node.id),
            });
        }
    }
    let graph = match PipelineGraph::build(&unique, edges) {
        Ok(graph) => graph,
        Err(e) => {
            errors.push(ValidationIssue {
                node_id: String::new(),
                node_type: String::new(),
                field: "graph".to_string(),
                message: e.to_string(),
            });
            return ValidationReport { valid: false, errors, warnings };
        }
    };

    let rules = built_in_rules();
    for node in nodes {
        let Some(descriptor) = registry.get(&node.node_type) else {
            errors.push(ValidationIssue {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
                field: "type".to_string(),
                message: format!("Unknown node type '{}'.", node.node_type),
            });
            continue;
        };
        let idx = graph.index_of(&node.id);
        let ctx = NodeContext {
            node,
            descriptor,
            graph: &graph,
            in_degree: idx.map_or(0, |i| graph.in_degree(i)),
            out_degree: idx.map_or(0, |i| graph.out_degree(i)),
        };
        for diagnostic in rules.iter().flat_map(|rule| rule.apply(&ctx)) {
            match diagnostic.severity {
                Severity::Error => errors.push(ValidationIssue {
                    node_id: node.id.clone(),
                    node_type: node.node_type.clone(),
                    field: diagnostic.field.unwrap_or_default(),
                    message: diagnostic.message,
                }),
                Severity::Warning => warnings.push(diagnostic.message),
            }
        }
    }

    tracing::debug!(errors = errors.len(), warnings = warnings.len(), "Validation finished");
    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}
