//! Suspended-run storage.
//!
//! A run that reaches a node flagged `require_approval` parks its partial
//! results here under its pipeline id until a resume call takes them back.
//! The store is owned by the engine and injected at construction.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use weft_types::Result;

/// Partial results of a run waiting for human input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspendedRun {
    pub pipeline_id: String,
    /// Node the run paused at.
    pub paused_at: String,
    /// Results computed so far, keyed by node id.
    pub results: HashMap<String, Value>,
    pub suspended_at: DateTime<Utc>,
}

impl SuspendedRun {
    pub fn new(
        pipeline_id: impl Into<String>,
        paused_at: impl Into<String>,
        results: HashMap<String, Value>,
    ) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            paused_at: paused_at.into(),
            results,
            suspended_at: Utc::now(),
        }
    }
}

/// At most one suspended run per pipeline id.
#[async_trait]
pub trait SuspendedRunStore: Send + Sync {
    /// Store `run`, replacing any state under the same id.
    async fn put(&self, run: SuspendedRun) -> Result<()>;

    async fn get(&self, pipeline_id: &str) -> Result<Option<SuspendedRun>>;

    /// Remove and return the state. Of two concurrent takes on the same id,
    /// exactly one receives it.
    async fn take(&self, pipeline_id: &str) -> Result<Option<SuspendedRun>>;

    /// Returns whether anything was removed.
    async fn delete(&self, pipeline_id: &str) -> Result<bool>;
}

/// Process-memory store. State does not survive a restart.
#[derive(Debug, Default)]
pub struct InMemorySuspendedRuns {
    runs: Mutex<HashMap<String, SuspendedRun>>,
}

impl InMemorySuspendedRuns {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.runs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.runs.lock().await.is_empty()
    }
}

#[async_trait]
impl SuspendedRunStore for InMemorySuspendedRuns {
    async fn put(&self, run: SuspendedRun) -> Result<()> {
        tracing::debug!(pipeline_id = %run.pipeline_id, node = %run.paused_at, "Run suspended");
        self.runs.lock().await.insert(run.pipeline_id.clone(), run);
        Ok(())
    }

    async fn get(&self, pipeline_id: &str) -> Result<Option<SuspendedRun>> {
        Ok(self.runs.lock().await.get(pipeline_id).cloned())
    }

    async fn take(&self, pipeline_id: &str) -> Result<Option<SuspendedRun>> {
        Ok(self.runs.lock().await.remove(pipeline_id))
    }

    async fn delete(&self, pipeline_id: &str) -> Result<bool> {
        Ok(self.runs.lock().await.remove(pipeline_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn run(id: &str) -> SuspendedRun {
        let mut results = HashMap::new();
        results.insert("a".to_string(), json!("hello"));
        SuspendedRun::new(id, "b", results)
    }

    #[tokio::test]
    async fn put_get_delete() {
        let store = InMemorySuspendedRuns::new();
        store.put(run("p1")).await.unwrap();

        let got = store.get("p1").await.unwrap().unwrap();
        assert_eq!(got.paused_at, "b");
        assert_eq!(got.results["a"], json!("hello"));
        assert!(store.get("p2").await.unwrap().is_none());

        assert!(store.delete("p1").await.unwrap());
        assert!(!store.delete("p1").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn put_replaces_existing_state() {
        let store = InMemorySuspendedRuns::new();
        store.put(run("p1")).await.unwrap();
        store.put(SuspendedRun::new("p1", "c", HashMap::new())).await.unwrap();
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("p1").await.unwrap().unwrap().paused_at, "c");
    }

    #[tokio::test]
    async fn concurrent_takes_yield_state_once() {
        let store = Arc::new(InMemorySuspendedRuns::new());
        store.put(run("p1")).await.unwrap();

        let (s1, s2) = (store.clone(), store.clone());
        let (a, b) = tokio::join!(
            tokio::spawn(async move { s1.take("p1").await.unwrap() }),
            tokio::spawn(async move { s2.take("p1").await.unwrap() }),
        );
        let hits = [a.unwrap(), b.unwrap()].iter().filter(|r| r.is_some()).count();
        assert_eq!(hits, 1);
    }

    #[test]
    fn serializes_with_timestamp() {
        let json = serde_json::to_value(run("p1")).unwrap();
        assert_eq!(json["pipeline_id"], "p1");
        assert!(json["suspended_at"].is_string());
    }
}
