use async_trait::async_trait;
use serde_json::Value;

use weft_schema::NodeSpec;
use weft_types::{Result, Secrets};

use crate::executor::{ChunkSink, NodeExecutor, NodeInputs, NodeOutput};

/// Pipeline entry point: the configured `value`, else the variable name.
pub struct InputExecutor;

#[async_trait]
impl NodeExecutor for InputExecutor {
    fn node_type(&self) -> &str {
        "customInput"
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        _inputs: &NodeInputs,
        _env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        if let Some(value) = node.data.get("value").filter(|v| !v.is_null()) {
            return Ok(NodeOutput::free(value.clone()));
        }
        let name = node.str_or("inputName", &format!("input_{}", node.id));
        Ok(NodeOutput::free(name))
    }
}

/// Pipeline exit point: passes the first predecessor's result through.
pub struct OutputExecutor;

#[async_trait]
impl NodeExecutor for OutputExecutor {
    fn node_type(&self) -> &str {
        "customOutput"
    }

    async fn execute(
        &self,
        _node: &NodeSpec,
        inputs: &NodeInputs,
        _env: &Secrets,
        _chunks: &ChunkSink<'_>,
    ) -> Result<NodeOutput> {
        let value = inputs
            .first()
            .cloned()
            .unwrap_or_else(|| Value::String("output".into()));
        Ok(NodeOutput::free(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn run(executor: &dyn NodeExecutor, node: &NodeSpec, inputs: &NodeInputs) -> Value {
        executor
            .execute(node, inputs, &Secrets::new(), &ChunkSink::discard())
            .await
            .unwrap()
            .value
    }

    #[tokio::test]
    async fn input_prefers_value_then_name_then_id() {
        let empty = NodeInputs::default();
        let with_value = NodeSpec::new("in", "customInput")
            .with("value", "hello")
            .with("inputName", "q");
        assert_eq!(run(&InputExecutor, &with_value, &empty).await, json!("hello"));

        let named = NodeSpec::new("in", "customInput").with("inputName", "question");
        assert_eq!(run(&InputExecutor, &named, &empty).await, json!("question"));

        let bare = NodeSpec::new("in7", "customInput");
        assert_eq!(run(&InputExecutor, &bare, &empty).await, json!("input_in7"));
    }

    #[tokio::test]
    async fn output_passes_first_upstream_through() {
        let node = NodeSpec::new("out", "customOutput");
        let inputs = NodeInputs::single(json!({"answer": 42}));
        assert_eq!(run(&OutputExecutor, &node, &inputs).await, json!({"answer": 42}));
        assert_eq!(
            run(&OutputExecutor, &node, &NodeInputs::default()).await,
            json!("output")
        );
    }
}
