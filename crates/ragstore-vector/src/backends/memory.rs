use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

use ragstore_core::embed::cosine_similarity;
use ragstore_core::traits::VectorBackend;
use ragstore_core::types::{
    Capabilities, DeleteSelector, DocumentId, Filter, Metadata, Provider, SimilarityResult, VectorRecord,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPoint {
    content: String,
    #[serde(default)]
    metadata: Metadata,
    vector: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    dimension: Option<usize>,
    points: BTreeMap<DocumentId, StoredPoint>,
}

/// In-process store with brute-force cosine search.
///
/// With a `path`, `flush` writes a JSON snapshot and `load` reads it back;
/// nothing is written between flushes.
pub struct MemoryBackend {
    table: String,
    path: Option<PathBuf>,
    created: RwLock<bool>,
    data: RwLock<Snapshot>,
}

impl MemoryBackend {
    pub fn new(table: impl Into<String>, path: Option<PathBuf>) -> Self {
        Self { table: table.into(), path, created: RwLock::new(false), data: RwLock::new(Snapshot::default()) }
    }
}

#[async_trait]
impl VectorBackend for MemoryBackend {
    fn provider(&self) -> Provider {
        Provider::Memory
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { metadata_filter: true, ..Capabilities::default() }
    }

    fn table_name(&self) -> &str {
        &self.table
    }

    fn persist_location(&self) -> String {
        self.path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| ":memory:".to_string())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(*self.created.read() || self.path.as_ref().is_some_and(|p| p.exists()))
    }

    async fn create(&self, dimension: usize) -> Result<()> {
        let mut data = self.data.write();
        data.dimension = Some(dimension);
        data.points.clear();
        *self.created.write() = true;
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        if let Some(path) = &self.path {
            if path.exists() {
                let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
                let snapshot: Snapshot =
                    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
                debug!(path = %path.display(), points = snapshot.points.len(), "memory snapshot loaded");
                *self.data.write() = snapshot;
            }
        }
        *self.created.write() = true;
        Ok(())
    }

    async fn insert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut data = self.data.write();
        for r in records {
            data.points.insert(
                r.id.clone(),
                StoredPoint { content: r.content.clone(), metadata: r.metadata.clone(), vector: r.vector.clone() },
            );
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize, filter: Option<&Filter>) -> Result<Vec<SimilarityResult>> {
        let data = self.data.read();
        let mut hits: Vec<SimilarityResult> = data
            .points
            .iter()
            .filter(|(_, p)| filter.map_or(true, |f| f.matches(&p.metadata)))
            .map(|(id, p)| SimilarityResult {
                id: Some(id.clone()),
                content: p.content.clone(),
                metadata: p.metadata.clone(),
                score: cosine_similarity(vector, &p.vector),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<usize> {
        let mut data = self.data.write();
        let before = data.points.len();
        data.points.retain(|id, p| !selector.matches(id, &p.metadata));
        Ok(before - data.points.len())
    }

    async fn count(&self) -> Result<Option<u64>> {
        Ok(Some(self.data.read().points.len() as u64))
    }

    async fn flush(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        let json = serde_json::to_vec(&*self.data.read())?;
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| std::path::Path::new("."));
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&json)?;
        tmp.persist(path).with_context(|| format!("writing {}", path.display()))?;
        debug!(path = %path.display(), "memory snapshot saved");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, vector: Vec<f32>, meta: serde_json::Value) -> VectorRecord {
        VectorRecord {
            id: id.into(),
            content: format!("content {id}"),
            metadata: meta.as_object().cloned().unwrap_or_default(),
            vector,
        }
    }

    #[tokio::test]
    async fn snapshot_survives_reload() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("mem.json");
        let store = MemoryBackend::new("t", Some(path.clone()));
        store.create(2).await.expect("create");
        store.insert(&[record("a", vec![1.0, 0.0], json!({}))]).await.expect("insert");
        store.flush().await.expect("flush");

        let reopened = MemoryBackend::new("t", Some(path));
        assert!(reopened.exists().await.expect("exists"));
        reopened.load().await.expect("load");
        assert_eq!(reopened.count().await.expect("count"), Some(1));
    }

    #[tokio::test]
    async fn query_ranks_and_filters() {
        let store = MemoryBackend::new("t", None);
        store.create(2).await.expect("create");
        store
            .insert(&[
                record("a", vec![1.0, 0.0], json!({"lang": "en"})),
                record("b", vec![0.7, 0.7], json!({"lang": "de"})),
            ])
            .await
            .expect("insert");
        let hits = store.query(&[1.0, 0.0], 2, None).await.expect("query");
        assert_eq!(hits[0].id.as_deref(), Some("a"));
        let de = Filter::new().equals("lang", "de");
        let hits = store.query(&[1.0, 0.0], 2, Some(&de)).await.expect("query");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_deref(), Some("b"));
    }
}
