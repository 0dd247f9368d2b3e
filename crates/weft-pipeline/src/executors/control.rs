use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use weft_schema::NodeSpec;
use weft_types::{Result, Secrets};

use super::number_field;
use crate::executor::{ChunkSink, FailurePolicy, NodeExecutor, NodeInputs, NodeOutput};
use crate::expression::{evaluate_bool, Bindings};

/// Hard ceiling on loop unrolling regardless of configuration.
pub const MAX_LOOP_ITEMS: usize = 100;
const DEFAULT_LOOP_ITEMS: usize = 3;

/// `value` and `input` bound to the first upstream result.
fn upstream_bindings(inputs: &NodeInputs) -> Bindings {
    let value = inputs.first().cloned().unwrap_or(Value::Null);
    let mut vars = Bindings::new().bind("value", &value).bind("input", &value);
    if let Some(a) = inputs.lookup("a") {
        vars = vars.bind("a", a);
    }
    if let Some(b) = inputs.lookup("b") {
        vars = vars.bind("b", b);
    }
    vars
}

// ---------------------------------------------------------------------------
// FilterExecutor
// ---------------------------------------------------------------------------

/// Passes the upstream value when the condition holds, else `null`. A blank
/// condition tests the value's own truthiness.
pub struct FilterExecutor;

#[async_trait]
impl NodeExecutor for FilterExecutor {
    fn node_type(&self) -> &str {
        "filter"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::ReportAsResult
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        _env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let condition = node.str_or("condition", "value");
        let passed = evaluate_bool(&condition, &upstream_bindings(inputs))?;
        let value = if passed {
            inputs.first().cloned().unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        Ok(NodeOutput::free(value))
    }
}

// ---------------------------------------------------------------------------
// ConditionalExecutor
// ---------------------------------------------------------------------------

pub struct ConditionalExecutor;

#[async_trait]
impl NodeExecutor for ConditionalExecutor {
    fn node_type(&self) -> &str {
        "conditional"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::ReportAsResult
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        _env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let condition = node.str_or("condition", "true");
        let fired = evaluate_bool(&condition, &upstream_bindings(inputs))?;
        tracing::debug!(node = %node.id, condition = %condition, fired, "Condition evaluated");
        Ok(NodeOutput::free(json!({
            "branch": if fired { "true" } else { "false" },
            "condition": condition,
            "value": inputs.first().cloned().unwrap_or(Value::Null),
        })))
    }
}

// ---------------------------------------------------------------------------
// LoopExecutor
// ---------------------------------------------------------------------------

/// Unrolls at most `maxIterations` items (never more than
/// [`MAX_LOOP_ITEMS`]) from the upstream list, JSON array text, or lines.
pub struct LoopExecutor;

#[async_trait]
impl NodeExecutor for LoopExecutor {
    fn node_type(&self) -> &str {
        "loop"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::ReportAsResult
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        inputs: &NodeInputs,
        _env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let limit = number_field(node, "maxIterations")
            .filter(|n| *n >= 1.0)
            .map(|n| (n as usize).min(MAX_LOOP_ITEMS))
            .unwrap_or(DEFAULT_LOOP_ITEMS);

        let items: Vec<Value> = if node.str_or("loopMode", "For Each") == "Fixed Count" {
            (0..limit).map(|i| json!(i)).collect()
        } else {
            match inputs.first() {
                Some(value) => loop_items(value),
                None => (0..limit).map(|i| json!(format!("item_{i}"))).collect(),
            }
        };

        let items: Vec<Value> = items.into_iter().take(limit).collect();
        Ok(NodeOutput::free(Value::Array(items)))
    }
}

fn loop_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Array(items)) => items,
            _ => s
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(|line| Value::String(line.to_string()))
                .collect(),
        },
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

// ---------------------------------------------------------------------------
// DelayExecutor
// ---------------------------------------------------------------------------

/// Sleeps for the configured duration, capped at `max_delay`.
pub struct DelayExecutor {
    max_delay: Duration,
}

impl DelayExecutor {
    pub fn new(max_delay: Duration) -> Self {
        Self { max_delay }
    }

    fn requested(node: &NodeSpec) -> (Duration, String, String) {
        let raw = node.str_or("delaySeconds", "1");
        let amount = number_field(node, "delaySeconds").unwrap_or(1.0).max(0.0);
        let unit = node.str_or("delayUnit", "Seconds");
        let seconds = match unit.as_str() {
            "Milliseconds" => amount / 1000.0,
            "Minutes" => amount * 60.0,
            _ => amount,
        };
        let duration = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);
        (duration, raw, unit)
    }
}

#[async_trait]
impl NodeExecutor for DelayExecutor {
    fn node_type(&self) -> &str {
        "delay"
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::ReportAsResult
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        _inputs: &NodeInputs,
        _env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let (requested, raw, unit) = Self::requested(node);
        let wait = requested.min(self.max_delay);
        if wait < requested {
            tracing::debug!(node = %node.id, ?requested, ?wait, "Delay capped");
        }
        tokio::time::sleep(wait).await;
        Ok(NodeOutput::free(format!("Delayed {} {}", raw, unit)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    async fn run(executor: &dyn NodeExecutor, node: &NodeSpec, inputs: &NodeInputs) -> Result<Value> {
        executor
            .execute(node, inputs, &Secrets::new(), &ChunkSink::discard())
            .await
            .map(|out| out.value)
    }

    #[tokio::test]
    async fn filter_passes_or_nulls() {
        let node = NodeSpec::new("f", "filter").with("condition", "value > 10");
        assert_eq!(run(&FilterExecutor, &node, &NodeInputs::single(42)).await.unwrap(), json!(42));
        assert_eq!(run(&FilterExecutor, &node, &NodeInputs::single(3)).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn conditional_reports_branch() {
        let node = NodeSpec::new("c", "conditional").with("condition", "value.length > 5");
        let out = run(&ConditionalExecutor, &node, &NodeInputs::single("short"))
            .await
            .unwrap();
        assert_eq!(out["branch"], "false");
        assert_eq!(out["condition"], "value.length > 5");
        assert_eq!(out["value"], "short");

        let long = run(&ConditionalExecutor, &node, &NodeInputs::single("much longer"))
            .await
            .unwrap();
        assert_eq!(long["branch"], "true");
    }

    #[tokio::test]
    async fn conditional_bad_expression_is_error() {
        let node = NodeSpec::new("c", "conditional").with("condition", "require('fs')");
        assert!(run(&ConditionalExecutor, &node, &NodeInputs::single("x")).await.is_err());
    }

    #[tokio::test]
    async fn loop_caps_items() {
        let node = NodeSpec::new("l", "loop").with("maxIterations", 2);
        let out = run(&LoopExecutor, &node, &NodeInputs::single(json!([1, 2, 3])))
            .await
            .unwrap();
        assert_eq!(out, json!([1, 2]));

        let lines = run(&LoopExecutor, &node, &NodeInputs::single("a\n\nb\nc")).await.unwrap();
        assert_eq!(lines, json!(["a", "b"]));

        let huge = NodeSpec::new("l", "loop")
            .with("maxIterations", 10_000)
            .with("loopMode", "Fixed Count");
        let out = run(&LoopExecutor, &huge, &NodeInputs::default()).await.unwrap();
        assert_eq!(out.as_array().unwrap().len(), MAX_LOOP_ITEMS);
    }

    #[tokio::test]
    async fn loop_without_upstream_emits_placeholders() {
        let node = NodeSpec::new("l", "loop");
        let out = run(&LoopExecutor, &node, &NodeInputs::default()).await.unwrap();
        assert_eq!(out, json!(["item_0", "item_1", "item_2"]));
    }

    #[tokio::test]
    async fn delay_is_capped() {
        let node = NodeSpec::new("d", "delay")
            .with("delaySeconds", "10")
            .with("delayUnit", "Minutes");
        let executor = DelayExecutor::new(Duration::from_millis(20));
        let started = Instant::now();
        let out = run(&executor, &node, &NodeInputs::default()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(out, json!("Delayed 10 Minutes"));
    }

    #[test]
    fn delay_units() {
        let ms = NodeSpec::new("d", "delay")
            .with("delaySeconds", 250)
            .with("delayUnit", "Milliseconds");
        assert_eq!(DelayExecutor::requested(&ms).0, Duration::from_millis(250));
    }
}
