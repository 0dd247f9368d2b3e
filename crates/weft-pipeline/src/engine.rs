//! Pipeline execution engine.
//!
//! A run moves through `Planning -> Running -> {Suspended | Completed | Failed}`.
//! Nodes execute one at a time in topological plan order; every transition
//! is reported on the run's [`EventSink`]. A node flagged `require_approval`
//! parks the partial results in the [`SuspendedRunStore`] and ends the run;
//! a later call with the same `pipeline_id` and `resume_node_id` picks up
//! after it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use weft_llm::ProviderFactory;
use weft_schema::{check_graph_limits, ExecuteRequest, NodeSpec};
use weft_types::{NodeMetrics, Result, RunState, Secrets, WeftError};

use crate::events::{EventSink, PipelineEvent, PAUSED_MESSAGE};
use crate::executor::{ChunkSink, ExecutorRegistry, FailurePolicy, NodeInputs, NodeOutput, Upstream};
use crate::executors::default_registry;
use crate::graph::PipelineGraph;
use crate::state::{InMemorySuspendedRuns, SuspendedRun, SuspendedRunStore};

const TRUNCATION_MARKER: &str = "...(truncated)";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single `delay` node.
    pub max_delay: Duration,
    /// Longest result, in characters, carried by a `node_complete` event.
    pub result_char_limit: usize,
    /// Capacity of the event channel used by [`ExecutionEngine::stream`].
    pub event_buffer: usize,
    /// Request timeout for integration executors and LLM providers.
    pub http_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_delay: Duration::from_secs(5),
            result_char_limit: 4096,
            event_buffer: 64,
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_result_char_limit(mut self, limit: usize) -> Self {
        self.result_char_limit = limit;
        self
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// RunOutcome
// ---------------------------------------------------------------------------

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { pipeline_id: String },
    Suspended { pipeline_id: String, node_id: String },
    Failed { message: String },
    /// The event receiver was dropped mid-run.
    Abandoned,
}

impl RunOutcome {
    pub fn state(&self) -> RunState {
        match self {
            RunOutcome::Completed { .. } => RunState::Completed,
            RunOutcome::Suspended { .. } => RunState::Suspended,
            RunOutcome::Failed { .. } | RunOutcome::Abandoned => RunState::Failed,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Cap a result for the event stream. Long strings are cut at a character
/// boundary; other values whose JSON is too long become truncated JSON text.
pub fn bound_result(value: &Value, limit: usize) -> Value {
    fn cut(text: &str, limit: usize) -> Option<String> {
        let (end, _) = text.char_indices().nth(limit)?;
        Some(format!("{}{TRUNCATION_MARKER}", &text[..end]))
    }

    match value {
        Value::String(s) => cut(s, limit).map(Value::String).unwrap_or_else(|| value.clone()),
        other => {
            let json = other.to_string();
            cut(&json, limit).map(Value::String).unwrap_or_else(|| other.clone())
        }
    }
}

/// Handle ids arrive as `<node id>-<name>`; executors see `<name>`.
fn handle_name(target: &NodeSpec, handle: Option<&str>) -> Option<String> {
    let handle = handle?;
    let name = handle
        .strip_prefix(target.id.as_str())
        .and_then(|rest| rest.strip_prefix('-'))
        .unwrap_or(handle);
    Some(name.to_string())
}

/// Predecessor results for `idx`, in edge order.
fn gather_inputs(graph: &PipelineGraph, idx: usize, results: &HashMap<String, Value>) -> NodeInputs {
    let target = graph.node_at(idx);
    let items = graph
        .incoming(idx)
        .filter_map(|edge| {
            let source = graph.node_at(edge.source);
            let value = results.get(&source.id)?.clone();
            Some(Upstream {
                node_id: source.id.clone(),
                node_type: source.node_type.clone(),
                alias: source
                    .str_field("inputName")
                    .or_else(|| source.str_field("outputName"))
                    .filter(|a| !a.trim().is_empty()),
                handle: handle_name(target, edge.target_handle.as_deref()),
                value,
            })
        })
        .collect();
    NodeInputs::new(items)
}

/// Attribute a fatal failure to its node. Credential errors keep their own
/// message.
fn attribute(node: &NodeSpec, err: WeftError) -> WeftError {
    match err {
        e @ (WeftError::MissingCredential { .. }
        | WeftError::Executor { .. }
        | WeftError::StreamClosed) => e,
        other => WeftError::Executor {
            executor: node.node_type.clone(),
            node: node.id.clone(),
            message: other.to_string(),
        },
    }
}

fn failure_text(err: &WeftError) -> String {
    match err {
        WeftError::Executor { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Walks a pipeline graph and dispatches each node to its executor.
pub struct ExecutionEngine {
    registry: Arc<ExecutorRegistry>,
    suspended: Arc<dyn SuspendedRunStore>,
    config: EngineConfig,
}

impl ExecutionEngine {
    pub fn new(
        registry: ExecutorRegistry,
        suspended: Arc<dyn SuspendedRunStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            suspended,
            config,
        }
    }

    /// Engine with every built-in executor and in-memory suspended state.
    pub fn with_defaults(providers: Arc<dyn ProviderFactory>) -> Result<Self> {
        let config = EngineConfig::default();
        let registry = default_registry(&config, providers)?;
        Ok(Self::new(
            registry,
            Arc::new(InMemorySuspendedRuns::new()),
            config,
        ))
    }

    pub fn registry(&self) -> &ExecutorRegistry {
        &self.registry
    }

    pub fn suspended_runs(&self) -> &Arc<dyn SuspendedRunStore> {
        &self.suspended
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute `request`, emitting events on `sink`. Failures are reported
    /// as a terminal `error` event, never returned.
    pub async fn run(&self, request: ExecuteRequest, sink: &EventSink) -> RunOutcome {
        let mut restored: Option<SuspendedRun> = None;
        let result = self.drive(request, sink, &mut restored).await;

        if result.is_err() {
            if let Some(state) = restored.take() {
                let pipeline_id = state.pipeline_id.clone();
                if let Err(e) = self.suspended.put(state).await {
                    tracing::error!(pipeline_id = %pipeline_id, error = %e, "Failed to restore suspended state");
                }
            }
        }

        match result {
            Ok(outcome) => outcome,
            Err(WeftError::StreamClosed) => {
                tracing::info!("Event consumer went away, abandoning run");
                RunOutcome::Abandoned
            }
            Err(e) => {
                let message = e.to_string();
                tracing::error!(error = %message, "Pipeline run failed");
                let _ = sink.emit(PipelineEvent::error(message.clone())).await;
                RunOutcome::Failed { message }
            }
        }
    }

    async fn drive(
        &self,
        request: ExecuteRequest,
        sink: &EventSink,
        restored: &mut Option<SuspendedRun>,
    ) -> Result<RunOutcome> {
        let ExecuteRequest {
            nodes,
            edges,
            pipeline_id,
            resume_node_id,
            user_input,
            env,
        } = request;
        let pipeline_id = pipeline_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        // Planning
        check_graph_limits(&nodes, &edges)?;
        let graph = PipelineGraph::build(&nodes, &edges)?;
        let plan = graph.topological_order().ok_or(WeftError::CyclicGraph)?;

        let mut results: HashMap<String, Value> = HashMap::new();
        let mut start = 0;
        let mut resumed: Option<(String, Value)> = None;

        if let Some(resume_id) = resume_node_id.as_deref() {
            match self.suspended.take(&pipeline_id).await? {
                Some(state) => {
                    results = state.results.clone();
                    *restored = Some(state);
                    let position = plan.iter().position(|&i| graph.node_at(i).id == resume_id);
                    let input = user_input.filter(|u| !u.is_empty());
                    match (position, input) {
                        (Some(pos), Some(input)) => {
                            let value = Value::String(input);
                            results.insert(resume_id.to_string(), value.clone());
                            resumed = Some((resume_id.to_string(), value));
                            start = pos + 1;
                        }
                        (Some(pos), None) => start = pos,
                        (None, _) => {
                            tracing::warn!(pipeline_id = %pipeline_id, node = resume_id, "Resume node not in plan, starting over");
                        }
                    }
                }
                None => {
                    tracing::info!(pipeline_id = %pipeline_id, node = resume_id, "No suspended state, starting over");
                }
            }
        }

        // Running
        tracing::info!(pipeline_id = %pipeline_id, nodes = graph.len(), start, "Pipeline run started");
        sink.emit(PipelineEvent::PipelineStart {
            pipeline_id: pipeline_id.clone(),
            plan: graph.ids(&plan[start..]),
        })
        .await?;

        if let Some((node_id, value)) = resumed {
            sink.emit(PipelineEvent::NodeComplete {
                node_id,
                metrics: NodeMetrics::free(),
                result: bound_result(&value, self.config.result_char_limit),
            })
            .await?;
        }

        for &idx in &plan[start..] {
            if sink.is_closed() {
                return Err(WeftError::StreamClosed);
            }
            let node = graph.node_at(idx);
            sink.emit(PipelineEvent::NodeStart {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            })
            .await?;

            if node.requires_approval() {
                self.suspended
                    .put(SuspendedRun::new(&pipeline_id, &node.id, results))
                    .await?;
                *restored = None;
                tracing::info!(pipeline_id = %pipeline_id, node = %node.id, "Run suspended for approval");
                sink.emit(PipelineEvent::NodePaused {
                    node_id: node.id.clone(),
                    pipeline_id: pipeline_id.clone(),
                    message: PAUSED_MESSAGE.to_string(),
                })
                .await?;
                return Ok(RunOutcome::Suspended {
                    pipeline_id,
                    node_id: node.id.clone(),
                });
            }

            let output = self.execute_node(&graph, idx, &results, &env, sink).await?;
            results.insert(node.id.clone(), output.value.clone());
            sink.emit(PipelineEvent::NodeComplete {
                node_id: node.id.clone(),
                metrics: output.metrics,
                result: bound_result(&output.value, self.config.result_char_limit),
            })
            .await?;
        }

        // Completed
        self.suspended.delete(&pipeline_id).await?;
        *restored = None;
        tracing::info!(pipeline_id = %pipeline_id, "Pipeline run complete");
        sink.emit(PipelineEvent::PipelineComplete).await?;
        Ok(RunOutcome::Completed { pipeline_id })
    }

    async fn execute_node(
        &self,
        graph: &PipelineGraph,
        idx: usize,
        results: &HashMap<String, Value>,
        env: &Secrets,
        sink: &EventSink,
    ) -> Result<NodeOutput> {
        let node = graph.node_at(idx);
        let inputs = gather_inputs(graph, idx, results);
        let executor = self.registry.resolve(&node.node_type);
        let chunks = ChunkSink::new(sink, &node.id);
        let started = Instant::now();

        match executor.execute(node, &inputs, env, &chunks).await {
            Ok(output) => {
                tracing::info!(
                    node = %node.id,
                    node_type = %node.node_type,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    cost = output.metrics.cost,
                    tokens_in = output.metrics.tokens_in,
                    tokens_out = output.metrics.tokens_out,
                    "Node complete"
                );
                Ok(output)
            }
            Err(WeftError::StreamClosed) => Err(WeftError::StreamClosed),
            Err(e)
                if executor.failure_policy() == FailurePolicy::ReportAsResult
                    && !e.is_credential_error() =>
            {
                let message = failure_text(&e);
                tracing::warn!(node = %node.id, node_type = %node.node_type, error = %message, "Node failed, reporting as result");
                Ok(NodeOutput::free(format!("Error: {message}")))
            }
            Err(e) => Err(attribute(node, e)),
        }
    }

    /// Run on a spawned task and return the event stream. Dropping the
    /// stream abandons the run before its next node.
    pub fn stream(self: Arc<Self>, request: ExecuteRequest) -> ReceiverStream<PipelineEvent> {
        let (sink, rx) = EventSink::channel(self.config.event_buffer);
        tokio::spawn(async move {
            let run_sink = sink.clone();
            let run = tokio::spawn(async move { self.run(request, &run_sink).await });
            match run.await {
                Ok(outcome) => tracing::debug!(?outcome, "Streamed run finished"),
                Err(e) => {
                    // A panicking executor still ends the stream with `error`.
                    tracing::error!(error = %e, "Pipeline run task aborted");
                    let _ = sink
                        .emit(PipelineEvent::error(format!("Pipeline run aborted: {e}")))
                        .await;
                }
            }
        });
        ReceiverStream::new(rx)
    }

    /// Run to the end and collect every event.
    pub async fn collect(&self, request: ExecuteRequest) -> (RunOutcome, Vec<PipelineEvent>) {
        let (sink, mut rx) = EventSink::channel(self.config.event_buffer);
        let run = async move {
            let sink = sink;
            self.run(request, &sink).await
        };
        let gather = async {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        };
        tokio::join!(run, gather)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::NodeExecutor;
    use async_trait::async_trait;
    use serde_json::json;
    use weft_schema::EdgeSpec;

    struct Failing {
        node_type: &'static str,
        policy: FailurePolicy,
        credential: bool,
    }

    #[async_trait]
    impl NodeExecutor for Failing {
        fn node_type(&self) -> &str {
            self.node_type
        }

        fn failure_policy(&self) -> FailurePolicy {
            self.policy
        }

        async fn execute(
            &self,
            node: &NodeSpec,
            _inputs: &NodeInputs,
            _env: &Secrets,
            _chunks: &ChunkSink<'_>,
        ) -> Result<NodeOutput> {
            if self.credential {
                return Err(WeftError::missing_credential("Widget", "WIDGET_KEY"));
            }
            Err(WeftError::integration("Widget", format!("{} exploded", node.id)))
        }
    }

    /// Echoes its inputs as `{alias-or-handle: value}`.
    struct Inspect;

    #[async_trait]
    impl NodeExecutor for Inspect {
        fn node_type(&self) -> &str {
            "inspect"
        }

        async fn execute(
            &self,
            _node: &NodeSpec,
            inputs: &NodeInputs,
            _env: &Secrets,
            _chunks: &ChunkSink<'_>,
        ) -> Result<NodeOutput> {
            let map: serde_json::Map<String, Value> = inputs
                .iter()
                .map(|u| {
                    let key = u.handle.clone().or_else(|| u.alias.clone()).unwrap_or_else(|| u.node_id.clone());
                    (key, u.value.clone())
                })
                .collect();
            Ok(NodeOutput::free(Value::Object(map)))
        }
    }

    fn engine_with(extra: impl FnOnce(&mut ExecutorRegistry)) -> ExecutionEngine {
        let mut registry = ExecutorRegistry::new();
        registry.register(crate::executors::InputExecutor);
        registry.register(crate::executors::OutputExecutor);
        extra(&mut registry);
        ExecutionEngine::new(
            registry,
            Arc::new(InMemorySuspendedRuns::new()),
            EngineConfig::default(),
        )
    }

    fn names(events: &[PipelineEvent]) -> Vec<&'static str> {
        events.iter().map(PipelineEvent::name).collect()
    }

    #[test]
    fn bound_result_cuts_long_strings_and_json() {
        assert_eq!(bound_result(&json!("short"), 10), json!("short"));
        assert_eq!(bound_result(&json!("ééééé"), 3), json!("ééé...(truncated)"));
        assert_eq!(bound_result(&json!([1, 2, 3]), 4), json!("[1,2...(truncated)"));
        assert_eq!(bound_result(&json!({"a": 1}), 100), json!({"a": 1}));
    }

    #[test]
    fn handle_prefix_is_stripped() {
        let node = NodeSpec::new("llm-1", "llm");
        assert_eq!(handle_name(&node, Some("llm-1-prompt")).as_deref(), Some("prompt"));
        assert_eq!(handle_name(&node, Some("system")).as_deref(), Some("system"));
        assert_eq!(handle_name(&node, None), None);
    }

    #[tokio::test]
    async fn inputs_carry_aliases_and_handles() {
        let engine = engine_with(|r| r.register(Inspect));
        let nodes = vec![
            NodeSpec::new("in1", "customInput").with("inputName", "topic").with("value", "rust"),
            NodeSpec::new("in2", "customInput").with("value", "be brief"),
            NodeSpec::new("x", "inspect"),
        ];
        let edges = vec![
            EdgeSpec::new("in1", "x"),
            EdgeSpec::new("in2", "x").with_target_handle("x-system"),
        ];
        let (outcome, events) = engine.collect(ExecuteRequest::new(nodes, edges)).await;
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        let PipelineEvent::NodeComplete { result, .. } = &events[events.len() - 2] else {
            panic!("expected node_complete, got {events:?}");
        };
        assert_eq!(result, &json!({"topic": "rust", "system": "be brief"}));
    }

    #[tokio::test]
    async fn reported_failure_becomes_result() {
        let engine = engine_with(|r| {
            r.register(Failing {
                node_type: "widget",
                policy: FailurePolicy::ReportAsResult,
                credential: false,
            })
        });
        let nodes = vec![NodeSpec::new("w", "widget"), NodeSpec::new("out", "customOutput")];
        let edges = vec![EdgeSpec::new("w", "out")];
        let (outcome, events) = engine.collect(ExecuteRequest::new(nodes, edges)).await;

        assert_eq!(outcome.state(), RunState::Completed);
        assert_eq!(names(&events).last(), Some(&"pipeline_complete"));
        let PipelineEvent::NodeComplete { result, .. } = &events[2] else {
            panic!("expected node_complete");
        };
        assert_eq!(result, &json!("Error: Widget request failed: w exploded"));
    }

    #[tokio::test]
    async fn fatal_failure_stops_run() {
        let engine = engine_with(|r| {
            r.register(Failing {
                node_type: "widget",
                policy: FailurePolicy::Fatal,
                credential: false,
            })
        });
        let nodes = vec![NodeSpec::new("w", "widget"), NodeSpec::new("out", "customOutput")];
        let edges = vec![EdgeSpec::new("w", "out")];
        let (outcome, events) = engine.collect(ExecuteRequest::new(nodes, edges)).await;

        assert_eq!(names(&events), vec!["pipeline_start", "node_start", "error"]);
        let RunOutcome::Failed { message } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(
            message,
            "Executor 'widget' failed on node 'w': Widget request failed: w exploded"
        );
    }

    #[tokio::test]
    async fn credential_error_is_fatal_even_when_reporting() {
        let engine = engine_with(|r| {
            r.register(Failing {
                node_type: "widget",
                policy: FailurePolicy::ReportAsResult,
                credential: true,
            })
        });
        let (_, events) = engine
            .collect(ExecuteRequest::new(vec![NodeSpec::new("w", "widget")], vec![]))
            .await;
        assert_eq!(
            events.last(),
            Some(&PipelineEvent::error("Widget Error: WIDGET_KEY missing in settings."))
        );
    }

    #[tokio::test]
    async fn duplicate_ids_fail_before_start() {
        let engine = engine_with(|_| {});
        let nodes = vec![NodeSpec::new("a", "customInput"), NodeSpec::new("a", "customOutput")];
        let (outcome, events) = engine.collect(ExecuteRequest::new(nodes, vec![])).await;
        assert_eq!(names(&events), vec!["error"]);
        assert_eq!(outcome.state(), RunState::Failed);
    }

    #[tokio::test]
    async fn failed_resume_puts_state_back() {
        let engine = engine_with(|r| {
            r.register(Failing {
                node_type: "widget",
                policy: FailurePolicy::Fatal,
                credential: false,
            })
        });
        let nodes = vec![
            NodeSpec::new("gate", "customInput").with("require_approval", true),
            NodeSpec::new("w", "widget"),
        ];
        let edges = vec![EdgeSpec::new("gate", "w")];

        let first = ExecuteRequest::new(nodes.clone(), edges.clone()).with_pipeline_id("p1");
        let (outcome, _) = engine.collect(first).await;
        assert_eq!(outcome.state(), RunState::Suspended);

        let resume = ExecuteRequest::new(nodes, edges)
            .with_pipeline_id("p1")
            .resume("gate", Some("ok".into()));
        let (outcome, _) = engine.collect(resume).await;
        assert_eq!(outcome.state(), RunState::Failed);

        let state = engine.suspended_runs().get("p1").await.unwrap().unwrap();
        assert_eq!(state.paused_at, "gate");
    }

    #[tokio::test]
    async fn dropped_receiver_abandons_run() {
        let engine = engine_with(|_| {});
        let (sink, rx) = EventSink::channel(1);
        drop(rx);
        let outcome = engine
            .run(
                ExecuteRequest::new(vec![NodeSpec::new("a", "customInput")], vec![]),
                &sink,
            )
            .await;
        assert_eq!(outcome, RunOutcome::Abandoned);
    }

    struct Panicking;

    #[async_trait]
    impl NodeExecutor for Panicking {
        fn node_type(&self) -> &str {
            "panicky"
        }

        async fn execute(
            &self,
            _node: &NodeSpec,
            _inputs: &NodeInputs,
            _env: &Secrets,
            _chunks: &ChunkSink<'_>,
        ) -> Result<NodeOutput> {
            panic!("executor bug");
        }
    }

    #[tokio::test]
    async fn streamed_run_ends_with_error_when_executor_panics() {
        use tokio_stream::StreamExt;

        let engine = Arc::new(engine_with(|r| r.register(Panicking)));
        let nodes = vec![NodeSpec::new("p", "panicky"), NodeSpec::new("out", "customOutput")];
        let edges = vec![EdgeSpec::new("p", "out")];
        let events: Vec<PipelineEvent> = engine
            .stream(ExecuteRequest::new(nodes, edges))
            .collect()
            .await;

        assert_eq!(names(&events), vec!["pipeline_start", "node_start", "error"]);
        let PipelineEvent::Error { message } = &events[2] else {
            panic!("expected error");
        };
        assert!(message.starts_with("Pipeline run aborted"));
    }
}
