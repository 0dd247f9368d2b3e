//! Node executor trait, dynamic dispatch wrapper, and executor registry.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use weft_schema::NodeSpec;
use weft_types::{NodeMetrics, Result, Secrets};

use crate::events::{EventSink, PipelineEvent};

// ---------------------------------------------------------------------------
// Executor inputs and outputs
// ---------------------------------------------------------------------------

/// What a failed executor does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// The run emits `error` and stops.
    Fatal,
    /// The failure text becomes the node's result and the run continues.
    /// Missing credentials stay fatal.
    ReportAsResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    pub value: Value,
    pub metrics: NodeMetrics,
}

impl NodeOutput {
    pub fn new(value: impl Into<Value>, metrics: NodeMetrics) -> Self {
        Self {
            value: value.into(),
            metrics,
        }
    }

    /// Output of a node that made no paid calls.
    pub fn free(value: impl Into<Value>) -> Self {
        Self::new(value, NodeMetrics::free())
    }
}

/// One predecessor's result, as seen by the node consuming it.
#[derive(Debug, Clone, PartialEq)]
pub struct Upstream {
    pub node_id: String,
    pub node_type: String,
    /// The predecessor's `inputName` / `outputName`, if any.
    pub alias: Option<String>,
    /// Target handle name with the `<node id>-` prefix removed.
    pub handle: Option<String>,
    pub value: Value,
}

/// Predecessor results for one node, in edge order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeInputs {
    items: Vec<Upstream>,
}

impl NodeInputs {
    pub fn new(items: Vec<Upstream>) -> Self {
        Self { items }
    }

    /// A single unnamed upstream value.
    pub fn single(value: impl Into<Value>) -> Self {
        Self::new(vec![Upstream {
            node_id: "upstream".into(),
            node_type: "customInput".into(),
            alias: None,
            handle: None,
            value: value.into(),
        }])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Upstream> {
        self.items.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.items.iter().map(|u| &u.value)
    }

    pub fn first(&self) -> Option<&Value> {
        self.items.first().map(|u| &u.value)
    }

    pub fn get(&self, position: usize) -> Option<&Value> {
        self.items.get(position).map(|u| &u.value)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up by handle name, then alias, then node id.
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.items
            .iter()
            .find(|u| u.handle.as_deref() == Some(name))
            .or_else(|| self.items.iter().find(|u| u.alias.as_deref() == Some(name)))
            .or_else(|| self.items.iter().find(|u| u.node_id == name))
            .map(|u| &u.value)
    }

    /// First upstream value as text; empty when there is none.
    pub fn text(&self) -> String {
        self.first().map(value_to_text).unwrap_or_default()
    }

    pub fn joined_text(&self, separator: &str) -> String {
        self.values()
            .map(value_to_text)
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// Strings as-is, `null` as empty, everything else as compact JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Lets an executor stream partial output as `node_chunk` events.
pub struct ChunkSink<'a> {
    sink: Option<&'a EventSink>,
    node_id: &'a str,
}

impl<'a> ChunkSink<'a> {
    pub fn new(sink: &'a EventSink, node_id: &'a str) -> Self {
        Self {
            sink: Some(sink),
            node_id,
        }
    }

    /// Drops every chunk.
    pub fn discard() -> Self {
        Self {
            sink: None,
            node_id: "",
        }
    }

    pub async fn send(&self, chunk: impl Into<String>) -> Result<()> {
        match self.sink {
            Some(sink) => {
                sink.emit(PipelineEvent::NodeChunk {
                    node_id: self.node_id.to_string(),
                    chunk: chunk.into(),
                })
                .await
            }
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeExecutor trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// The node type key this executor handles (e.g. "llm", "join").
    fn node_type(&self) -> &str;

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Fatal
    }

    /// Compute the node's result from its configuration, its predecessors'
    /// results, and the run's secrets.
    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        env: &Secrets,
        chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput>;
}

// ---------------------------------------------------------------------------
// DynExecutor: object-safe wrapper
// ---------------------------------------------------------------------------

pub struct DynExecutor(Box<dyn NodeExecutor>);

impl DynExecutor {
    pub fn new(executor: impl NodeExecutor + 'static) -> Self {
        Self(Box::new(executor))
    }

    pub fn node_type(&self) -> &str {
        self.0.node_type()
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.0.failure_policy()
    }

    pub async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        env: &Secrets,
        chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        self.0.execute(node, inputs, env, chunks).await
    }
}

// ---------------------------------------------------------------------------
// ExecutorRegistry
// ---------------------------------------------------------------------------

pub struct ExecutorRegistry {
    executors: HashMap<String, DynExecutor>,
    fallback: DynExecutor,
}

impl ExecutorRegistry {
    /// An empty registry; every type resolves to [`EchoExecutor`].
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
            fallback: DynExecutor::new(EchoExecutor),
        }
    }

    /// Register an executor, replacing any previous one for the same type.
    pub fn register(&mut self, executor: impl NodeExecutor + 'static) {
        let t = executor.node_type().to_string();
        self.executors.insert(t, DynExecutor::new(executor));
    }

    pub fn get(&self, node_type: &str) -> Option<&DynExecutor> {
        self.executors.get(node_type)
    }

    pub fn has(&self, node_type: &str) -> bool {
        self.executors.contains_key(node_type)
    }

    /// The executor for `node_type`, or the echo fallback.
    pub fn resolve(&self, node_type: &str) -> &DynExecutor {
        self.executors.get(node_type).unwrap_or(&self.fallback)
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    pub fn node_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.executors.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Pass-through for node types with no registered executor.
pub struct EchoExecutor;

#[async_trait]
impl NodeExecutor for EchoExecutor {
    fn node_type(&self) -> &str {
        "echo"
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        _inputs: &NodeInputs,
        _env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        Ok(NodeOutput::new(
            format!("{}_result", node.node_type),
            NodeMetrics::new(0.0001, 5, 0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Constant;

    #[async_trait]
    impl NodeExecutor for Constant {
        fn node_type(&self) -> &str {
            "constant"
        }

        fn failure_policy(&self) -> FailurePolicy {
            FailurePolicy::ReportAsResult
        }

        async fn execute(
            &self,
            _node: &NodeSpec,
            _inputs: &NodeInputs,
            _env: &Secrets,
            _chunks: &ChunkSink<'_>,
        ) -> Result<NodeOutput> {
            Ok(NodeOutput::free(42))
        }
    }

    fn upstream(id: &str, alias: Option<&str>, handle: Option<&str>, value: Value) -> Upstream {
        Upstream {
            node_id: id.into(),
            node_type: "customInput".into(),
            alias: alias.map(String::from),
            handle: handle.map(String::from),
            value,
        }
    }

    #[test]
    fn lookup_prefers_handle_then_alias_then_id() {
        let inputs = NodeInputs::new(vec![
            upstream("n1", Some("a"), None, json!(1)),
            upstream("n2", None, Some("a"), json!(2)),
            upstream("b", None, None, json!(3)),
        ]);
        assert_eq!(inputs.lookup("a"), Some(&json!(2)));
        assert_eq!(inputs.lookup("b"), Some(&json!(3)));
        assert_eq!(inputs.lookup("n1"), Some(&json!(1)));
        assert_eq!(inputs.lookup("zzz"), None);
    }

    #[test]
    fn text_views() {
        let inputs = NodeInputs::new(vec![
            upstream("x", None, None, json!("hello")),
            upstream("y", None, None, json!({"k": 1})),
            upstream("z", None, None, Value::Null),
        ]);
        assert_eq!(inputs.text(), "hello");
        assert_eq!(inputs.joined_text("|"), "hello|{\"k\":1}|");
        assert_eq!(NodeInputs::default().text(), "");
    }

    #[tokio::test]
    async fn registry_resolves_registered_and_falls_back_to_echo() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Constant);
        assert!(registry.has("constant"));
        assert_eq!(registry.node_types(), vec!["constant"]);

        let node = NodeSpec::new("n", "constant");
        let out = registry
            .resolve("constant")
            .execute(&node, &NodeInputs::default(), &Secrets::new(), &ChunkSink::discard())
            .await
            .unwrap();
        assert_eq!(out.value, json!(42));
        assert_eq!(
            registry.resolve("constant").failure_policy(),
            FailurePolicy::ReportAsResult
        );

        let odd = NodeSpec::new("m", "mystery");
        let echoed = registry
            .resolve("mystery")
            .execute(&odd, &NodeInputs::default(), &Secrets::new(), &ChunkSink::discard())
            .await
            .unwrap();
        assert_eq!(echoed.value, json!("mystery_result"));
        assert_eq!(echoed.metrics.tokens_in, 5);
    }

    #[tokio::test]
    async fn chunk_sink_emits_node_chunks() {
        let (sink, mut rx) = EventSink::channel(4);
        let chunks = ChunkSink::new(&sink, "llm1");
        chunks.send("hel").await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            PipelineEvent::NodeChunk {
                node_id: "llm1".into(),
                chunk: "hel".into()
            }
        );
        ChunkSink::discard().send("ignored").await.unwrap();
    }
}
