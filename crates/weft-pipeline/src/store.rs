//! Saved-pipeline persistence.
//!
//! [`PipelineStore`] is the upsert/get/list/delete interface over named
//! node/edge lists. [`InMemoryPipelineStore`] backs embedding and tests;
//! [`JsonDirStore`] keeps one pretty-printed JSON document per pipeline in
//! a directory and backs the CLI.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use weft_schema::{EdgeSpec, NodeSpec};
use weft_types::{Result, WeftError};

/// Listing metadata for a saved pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPipeline {
    #[serde(flatten)]
    pub record: PipelineRecord,
    pub nodes: Vec<NodeSpec>,
    pub edges: Vec<EdgeSpec>,
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Insert or replace. `created_at` survives replacement.
    async fn upsert(
        &self,
        id: &str,
        name: &str,
        nodes: Vec<NodeSpec>,
        edges: Vec<EdgeSpec>,
    ) -> Result<PipelineRecord>;

    async fn get(&self, id: &str) -> Result<Option<SavedPipeline>>;

    /// Most recently updated first.
    async fn list(&self) -> Result<Vec<PipelineRecord>>;

    /// Returns whether anything was removed.
    async fn delete(&self, id: &str) -> Result<bool>;
}

fn stamp(id: &str, name: &str, previous: Option<&PipelineRecord>) -> PipelineRecord {
    let now = Utc::now();
    PipelineRecord {
        id: id.to_string(),
        name: name.to_string(),
        created_at: previous.map(|r| r.created_at).unwrap_or(now),
        updated_at: now,
    }
}

fn newest_first(records: &mut [PipelineRecord]) {
    records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
}

// ---------------------------------------------------------------------------
// InMemoryPipelineStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryPipelineStore {
    pipelines: RwLock<HashMap<String, SavedPipeline>>,
}

impl InMemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PipelineStore for InMemoryPipelineStore {
    async fn upsert(
        &self,
        id: &str,
        name: &str,
        nodes: Vec<NodeSpec>,
        edges: Vec<EdgeSpec>,
    ) -> Result<PipelineRecord> {
        let mut pipelines = self.pipelines.write().await;
        let record = stamp(id, name, pipelines.get(id).map(|p| &p.record));
        pipelines.insert(
            id.to_string(),
            SavedPipeline {
                record: record.clone(),
                nodes,
                edges,
            },
        );
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<SavedPipeline>> {
        Ok(self.pipelines.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<PipelineRecord>> {
        let mut records: Vec<PipelineRecord> = self
            .pipelines
            .read()
            .await
            .values()
            .map(|p| p.record.clone())
            .collect();
        newest_first(&mut records);
        Ok(records)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.pipelines.write().await.remove(id).is_some())
    }
}

// ---------------------------------------------------------------------------
// JsonDirStore
// ---------------------------------------------------------------------------

/// One `<id>.json` file per pipeline under `root`.
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Ids become file names, so only `[A-Za-z0-9_-]` is accepted.
    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id.len() <= 128
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(WeftError::Validation(format!(
                "pipeline id '{id}' may only contain letters, digits, '-' and '_'"
            )));
        }
        Ok(self.root.join(format!("{id}.json")))
    }

    async fn read(path: &Path) -> Result<Option<SavedPipeline>> {
        if !tokio::fs::try_exists(path).await? {
            return Ok(None);
        }
        let json = tokio::fs::read_to_string(path).await?;
        Ok(Some(serde_json::from_str(&json)?))
    }
}

#[async_trait]
impl PipelineStore for JsonDirStore {
    async fn upsert(
        &self,
        id: &str,
        name: &str,
        nodes: Vec<NodeSpec>,
        edges: Vec<EdgeSpec>,
    ) -> Result<PipelineRecord> {
        let path = self.path_for(id)?;
        tokio::fs::create_dir_all(&self.root).await?;
        let previous = Self::read(&path).await?;
        let record = stamp(id, name, previous.as_ref().map(|p| &p.record));
        let saved = SavedPipeline {
            record: record.clone(),
            nodes,
            edges,
        };
        tokio::fs::write(&path, serde_json::to_string_pretty(&saved)?).await?;
        tracing::debug!(path = %path.display(), "Pipeline saved");
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<SavedPipeline>> {
        Self::read(&self.path_for(id)?).await
    }

    async fn list(&self) -> Result<Vec<PipelineRecord>> {
        if !tokio::fs::try_exists(&self.root).await? {
            return Ok(Vec::new());
        }
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path).await {
                Ok(Some(saved)) => records.push(saved.record),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable pipeline"),
            }
        }
        newest_first(&mut records);
        Ok(records)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Ok(false);
        }
        tokio::fs::remove_file(&path).await?;
        Ok(true)
    }
}
