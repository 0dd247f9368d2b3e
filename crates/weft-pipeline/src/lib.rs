//! Pipeline graph engine: analysis, validation, layout, and execution.
//!
//! This crate builds a directed graph from a canvas's flat node/edge lists
//! and offers four read-only views of it (structural analysis, validation
//! against the node type catalog, layered auto-layout) plus the resumable
//! execution engine that walks the graph in topological order, dispatches
//! each node to its executor, and streams [`PipelineEvent`]s back.

pub mod analysis;
pub mod engine;
pub mod events;
pub mod executor;
pub mod executors;
pub mod expression;
pub mod graph;
pub mod layout;
pub mod registry;
pub mod state;
pub mod store;
pub mod validation;

pub use analysis::{analyze, AnalysisReport, INPUT_NODE_TYPE, OUTPUT_NODE_TYPE};
pub use engine::{bound_result, EngineConfig, ExecutionEngine, RunOutcome};
pub use events::{EventSink, PipelineEvent, PAUSED_MESSAGE};
pub use executor::{
    value_to_text, ChunkSink, DynExecutor, EchoExecutor, ExecutorRegistry, FailurePolicy,
    NodeExecutor, NodeInputs, NodeOutput, Upstream,
};
pub use executors::{default_registry, HttpContext, KNOWN_CREDENTIALS};
pub use expression::{evaluate, evaluate_bool, parse_expression, Bindings, Expr, Operand};
pub use graph::{PipelineEdge, PipelineGraph};
pub use layout::{auto_layout, NodePosition};
pub use registry::{node_types, FieldDescriptor, FieldKind, NodeTypeDescriptor, NodeTypeRegistry};
pub use state::{InMemorySuspendedRuns, SuspendedRun, SuspendedRunStore};
pub use store::{InMemoryPipelineStore, JsonDirStore, PipelineRecord, PipelineStore, SavedPipeline};
pub use validation::{
    built_in_rules, validate, validate_with, Diagnostic, LintRule, Severity, ValidationIssue,
    ValidationReport,
};
