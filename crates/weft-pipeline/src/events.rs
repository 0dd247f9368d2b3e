//! Execution event protocol.
//!
//! The engine emits [`PipelineEvent`]s through a bounded
//! [`tokio::sync::mpsc`] channel. Each event serializes to one JSON object
//! with an `event` discriminator; [`PipelineEvent::to_frame`] wraps it as a
//! `data:` frame for event-stream transports.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use weft_types::{NodeMetrics, Result, WeftError};

pub const PAUSED_MESSAGE: &str = "Execution paused for user input.";

/// Events emitted during pipeline execution, in emission order per node:
/// `node_start`, any `node_chunk`s, then `node_complete` or `node_paused`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    PipelineStart {
        pipeline_id: String,
        plan: Vec<String>,
    },
    NodeStart {
        node_id: String,
        node_type: String,
    },
    NodeChunk {
        node_id: String,
        chunk: String,
    },
    NodePaused {
        node_id: String,
        pipeline_id: String,
        message: String,
    },
    NodeComplete {
        node_id: String,
        metrics: NodeMetrics,
        result: Value,
    },
    Error {
        message: String,
    },
    PipelineComplete,
}

impl PipelineEvent {
    pub fn error(message: impl Into<String>) -> Self {
        PipelineEvent::Error {
            message: message.into(),
        }
    }

    /// Whether a consumer should stop reading after this event.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineEvent::Error { .. }
                | PipelineEvent::PipelineComplete
                | PipelineEvent::NodePaused { .. }
        )
    }

    pub fn node_id(&self) -> Option<&str> {
        match self {
            PipelineEvent::NodeStart { node_id, .. }
            | PipelineEvent::NodeChunk { node_id, .. }
            | PipelineEvent::NodePaused { node_id, .. }
            | PipelineEvent::NodeComplete { node_id, .. } => Some(node_id),
            _ => None,
        }
    }

    /// Bare event name, e.g. `node_start`.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::PipelineStart { .. } => "pipeline_start",
            PipelineEvent::NodeStart { .. } => "node_start",
            PipelineEvent::NodeChunk { .. } => "node_chunk",
            PipelineEvent::NodePaused { .. } => "node_paused",
            PipelineEvent::NodeComplete { .. } => "node_complete",
            PipelineEvent::Error { .. } => "error",
            PipelineEvent::PipelineComplete => "pipeline_complete",
        }
    }

    /// `data: <json>\n\n`
    pub fn to_frame(&self) -> Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }

    /// `<json>\n`
    pub fn to_json_line(&self) -> Result<String> {
        Ok(format!("{}\n", serde_json::to_string(self)?))
    }
}

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Sending half of a run's event stream.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<PipelineEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx }
    }

    /// A sink and its receiver with the given capacity.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PipelineEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Waits for capacity. Fails with [`WeftError::StreamClosed`] once the
    /// receiver is gone.
    pub async fn emit(&self, event: PipelineEvent) -> Result<()> {
        tracing::trace!(event = event.name(), "Emitting event");
        self.tx
            .send(event)
            .await
            .map_err(|_| WeftError::StreamClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_carry_snake_case_discriminator() {
        let event = PipelineEvent::NodeStart {
            node_id: "a".into(),
            node_type: "llm".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json, json!({"event": "node_start", "node_id": "a", "node_type": "llm"}));
        assert_eq!(event.name(), "node_start");
    }

    #[test]
    fn node_complete_shape() {
        let event = PipelineEvent::NodeComplete {
            node_id: "b".into(),
            metrics: NodeMetrics::new(0.5, 10, 20),
            result: json!("done"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["metrics"]["tokens_in"], 10);
        assert_eq!(json["metrics"]["tokens_out"], 20);
        assert_eq!(json["result"], "done");
    }

    #[test]
    fn frames() {
        let frame = PipelineEvent::PipelineComplete.to_frame().unwrap();
        assert_eq!(frame, "data: {\"event\":\"pipeline_complete\"}\n\n");
        let line = PipelineEvent::error("boom").to_json_line().unwrap();
        assert_eq!(line, "{\"event\":\"error\",\"message\":\"boom\"}\n");
    }

    #[test]
    fn decodes_from_wire() {
        let event: PipelineEvent = serde_json::from_str(
            r#"{"event":"pipeline_start","pipeline_id":"p","plan":["a","b"]}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            PipelineEvent::PipelineStart {
                pipeline_id: "p".into(),
                plan: vec!["a".into(), "b".into()],
            }
        );
    }

    #[test]
    fn terminal_events() {
        assert!(PipelineEvent::PipelineComplete.is_terminal());
        assert!(PipelineEvent::error("x").is_terminal());
        assert!(!PipelineEvent::NodeChunk {
            node_id: "a".into(),
            chunk: "hi".into()
        }
        .is_terminal());
    }

    #[tokio::test]
    async fn emit_fails_after_receiver_dropped() {
        let (sink, rx) = EventSink::channel(4);
        sink.emit(PipelineEvent::PipelineComplete).await.unwrap();
        drop(rx);
        assert!(sink.is_closed());
        let err = sink.emit(PipelineEvent::PipelineComplete).await.unwrap_err();
        assert!(matches!(err, WeftError::StreamClosed));
    }
}
