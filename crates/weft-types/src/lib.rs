//! Shared types and errors for the Weft pipeline graph engine.
//!
//! This crate provides the foundational types used across all other Weft crates:
//! - `WeftError`: unified error taxonomy
//! - `Secrets`: per-run credential map, never persisted
//! - `NodeMetrics`: cost and token usage reported by a node executor
//! - `RunState`: lifecycle state of a pipeline run

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unified error type for all Weft subsystems.
#[derive(Debug, thiserror::Error)]
pub enum WeftError {
    // === Structural Errors ===
    #[error("Graph contains cycles")]
    CyclicGraph,

    #[error("Duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("Too many {what}: {actual} exceeds the limit of {max}")]
    LimitExceeded {
        what: String,
        actual: usize,
        max: usize,
    },

    // === Validation Errors ===
    #[error("Pipeline validation failed: {0}")]
    Validation(String),

    // === Credential Errors ===
    #[error("{service} Error: {credential} missing in settings.")]
    MissingCredential { service: String, credential: String },

    // === Integration Errors ===
    #[error("{service} request failed: {message}")]
    Integration { service: String, message: String },

    #[error("Request to {service} timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    // === LLM Provider Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    Provider {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Authentication failed for provider {provider}")]
    Auth { provider: String },

    // === Execution Errors ===
    #[error("Executor '{executor}' failed on node '{node}': {message}")]
    Executor {
        executor: String,
        node: String,
        message: String,
    },

    #[error("Expression error: {0}")]
    Expression(String),

    #[error("Event stream closed by consumer")]
    StreamClosed,

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl WeftError {
    /// Returns `true` for a missing secret. Always fatal to a run.
    pub fn is_credential_error(&self) -> bool {
        matches!(self, WeftError::MissingCredential { .. })
    }

    /// Returns `true` if the graph itself is malformed (cycles, duplicate ids,
    /// oversized input). Never retried.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            WeftError::CyclicGraph
                | WeftError::DuplicateNode(_)
                | WeftError::LimitExceeded { .. }
        )
    }

    /// Builds a [`WeftError::MissingCredential`].
    pub fn missing_credential(service: impl Into<String>, credential: impl Into<String>) -> Self {
        WeftError::MissingCredential {
            service: service.into(),
            credential: credential.into(),
        }
    }

    /// Builds a [`WeftError::Integration`].
    pub fn integration(service: impl Into<String>, message: impl fmt::Display) -> Self {
        WeftError::Integration {
            service: service.into(),
            message: message.to_string(),
        }
    }
}

/// A convenience alias for `Result<T, WeftError>`.
pub type Result<T> = std::result::Result<T, WeftError>;

// ---------------------------------------------------------------------------
// Secrets: per-call credential map
// ---------------------------------------------------------------------------

/// Secret values (API keys, webhook URLs) supplied with each execution call.
///
/// `Debug` prints key names only so a stray `{:?}` never leaks a credential
/// into logs.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secrets(HashMap<String, String>);

impl Secrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Look up a secret. Blank values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.0.keys().collect();
        keys.sort();
        f.debug_struct("Secrets").field("keys", &keys).finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Secrets {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// NodeMetrics: cost/usage of a single node execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub cost: f64,
    pub tokens_in: u64,
    pub tokens_out: u64,
}

impl NodeMetrics {
    pub fn new(cost: f64, tokens_in: u64, tokens_out: u64) -> Self {
        Self {
            cost,
            tokens_in,
            tokens_out,
        }
    }

    /// Metrics for a node that made no paid calls.
    pub fn free() -> Self {
        Self::default()
    }
}

// ---------------------------------------------------------------------------
// RunState: execution lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Planning,
    Running,
    Suspended,
    Completed,
    Failed,
}

impl RunState {
    /// `Suspended` is resumable, the other terminal states are final.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Suspended | RunState::Completed | RunState::Failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_missing_credential() {
        let err = WeftError::missing_credential("Webhook", "SLACK_WEBHOOK_URL");
        assert_eq!(
            err.to_string(),
            "Webhook Error: SLACK_WEBHOOK_URL missing in settings."
        );
        assert!(err.is_credential_error());
        assert!(!err.is_structural());
    }

    #[test]
    fn error_display_cyclic_graph() {
        let err = WeftError::CyclicGraph;
        assert_eq!(err.to_string(), "Graph contains cycles");
        assert!(err.is_structural());
    }

    #[test]
    fn error_display_limit_exceeded() {
        let err = WeftError::LimitExceeded {
            what: "nodes".into(),
            actual: 1001,
            max: 1000,
        };
        assert_eq!(
            err.to_string(),
            "Too many nodes: 1001 exceeds the limit of 1000"
        );
        assert!(err.is_structural());
    }

    #[test]
    fn error_display_executor() {
        let err = WeftError::Executor {
            executor: "llm".into(),
            node: "summarize".into(),
            message: "prompt too long".into(),
        };
        assert_eq!(
            err.to_string(),
            "Executor 'llm' failed on node 'summarize': prompt too long"
        );
    }

    #[test]
    fn error_display_provider() {
        let err = WeftError::Provider {
            provider: "openrouter".into(),
            status: 500,
            message: "internal server error".into(),
        };
        assert_eq!(
            err.to_string(),
            "Provider openrouter returned HTTP 500: internal server error"
        );
        assert!(!err.is_credential_error());
    }

    #[test]
    fn integration_helper_formats_message() {
        let err = WeftError::integration("GitHub", "HTTP 404");
        assert_eq!(err.to_string(), "GitHub request failed: HTTP 404");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: WeftError = io.into();
        assert!(matches!(err, WeftError::Io(_)));
    }

    #[test]
    fn secrets_blank_values_are_absent() {
        let secrets: Secrets = [("OPENAI_API_KEY", "sk-test"), ("GITHUB_TOKEN", "  ")]
            .into_iter()
            .collect();
        assert_eq!(secrets.get("OPENAI_API_KEY"), Some("sk-test"));
        assert!(secrets.get("GITHUB_TOKEN").is_none());
        assert!(!secrets.contains("NOTION_TOKEN"));
        assert_eq!(secrets.len(), 2);
    }

    #[test]
    fn secrets_debug_hides_values() {
        let mut secrets = Secrets::new();
        secrets.insert("SENDGRID_API_KEY", "very-secret");
        let printed = format!("{secrets:?}");
        assert!(printed.contains("SENDGRID_API_KEY"));
        assert!(!printed.contains("very-secret"));
    }

    #[test]
    fn secrets_deserialize_from_plain_map() {
        let secrets: Secrets =
            serde_json::from_str(r#"{"NOTION_TOKEN": "secret_abc"}"#).unwrap();
        assert_eq!(secrets.get("NOTION_TOKEN"), Some("secret_abc"));
    }

    #[test]
    fn metrics_serialize_with_wire_names() {
        let m = NodeMetrics::new(0.0005, 30, 2);
        let json = serde_json::to_value(m).unwrap();
        assert_eq!(json["cost"], 0.0005);
        assert_eq!(json["tokens_in"], 30);
        assert_eq!(json["tokens_out"], 2);
        assert_eq!(NodeMetrics::free(), NodeMetrics::default());
    }

    #[test]
    fn run_state_terminality() {
        assert!(!RunState::Planning.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Suspended.is_terminal());
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Failed.is_terminal());
        assert_eq!(
            serde_json::to_string(&RunState::Suspended).unwrap(),
            "\"suspended\""
        );
    }
}
