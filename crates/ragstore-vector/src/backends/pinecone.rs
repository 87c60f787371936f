use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::warn;

use ragstore_core::config::PineconeConfig;
use ragstore_core::error::{Error, ErrorKind};
use ragstore_core::traits::VectorBackend;
use ragstore_core::types::{
    Capabilities, DeleteSelector, Filter, IndexedDocument, Provider, SimilarityResult, VectorRecord,
};

use super::NETWORK_BATCH;
use crate::http::{as_score, Auth, RestClient};

const API_VERSION: &str = "2024-07";
/// Metadata key holding the chunk text.
const TEXT_KEY: &str = "text";

/// Pinecone data-plane API against one index host.
///
/// Indexes are provisioned in the Pinecone console; `create` only checks
/// that the index dimension matches the embedder.
pub struct PineconeBackend {
    http: RestClient,
    index: String,
    namespace: String,
}

pub fn metadata_filter(filter: &Filter) -> Value {
    let clauses: serde_json::Map<String, Value> =
        filter.iter().map(|(k, v)| (k.clone(), json!({ "$eq": v }))).collect();
    Value::Object(clauses)
}

impl PineconeBackend {
    pub fn new(config: &PineconeConfig, index: &str, timeout: Duration) -> Result<Self> {
        let http = RestClient::new(Provider::Pinecone, &config.index_host, timeout, Auth::Header("Api-Key", config.api_key.clone()))?
            .with_header("X-Pinecone-API-Version", API_VERSION);
        Ok(Self { http, index: index.to_string(), namespace: config.namespace.clone().unwrap_or_default() })
    }

    async fn stats(&self, op: &str) -> Result<Value> {
        self.http.json(op, Method::POST, "describe_index_stats", Some(&json!({}))).await
    }

    fn namespace_count(&self, stats: &Value) -> u64 {
        stats["namespaces"][self.namespace.as_str()]["vectorCount"].as_u64().unwrap_or(0)
    }
}

#[async_trait]
impl VectorBackend for PineconeBackend {
    fn provider(&self) -> Provider {
        Provider::Pinecone
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { metadata_filter: true, auto_persist: true, max_batch: Some(NETWORK_BATCH), ..Capabilities::default() }
    }

    fn table_name(&self) -> &str {
        &self.index
    }

    fn persist_location(&self) -> String {
        self.http.base_url().to_string()
    }

    async fn exists(&self) -> Result<bool> {
        self.stats("index lookup").await?;
        Ok(true)
    }

    async fn create(&self, dimension: usize) -> Result<()> {
        let stats = self.stats("index lookup").await?;
        match stats["dimension"].as_u64() {
            Some(d) if d as usize != dimension => Err(Error::backend(
                Provider::Pinecone,
                ErrorKind::EmbeddingConfig,
                "index lookup",
                format!("index dimension is {d} but the embedder produces {dimension}"),
            )
            .into()),
            _ => Ok(()),
        }
    }

    async fn load(&self) -> Result<()> {
        self.stats("index lookup").await?;
        Ok(())
    }

    /// Pinecone metadata accepts scalars and string lists only.
    fn normalize(&self, doc: &mut IndexedDocument) {
        doc.metadata.retain(|_, v| !v.is_null());
        for v in doc.metadata.values_mut() {
            let keep = match v {
                Value::Array(items) => items.iter().all(Value::is_string),
                Value::Object(_) => false,
                _ => true,
            };
            if !keep {
                *v = Value::String(v.to_string());
            }
        }
    }

    async fn insert(&self, records: &[VectorRecord]) -> Result<()> {
        let vectors: Vec<Value> = records
            .iter()
            .map(|r| {
                let mut metadata = r.metadata.clone();
                metadata.insert(TEXT_KEY.to_string(), Value::String(r.content.clone()));
                json!({ "id": r.id, "values": r.vector, "metadata": metadata })
            })
            .collect();
        let body = json!({ "vectors": vectors, "namespace": self.namespace });
        self.http.json("upsert", Method::POST, "vectors/upsert", Some(&body)).await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize, filter: Option<&Filter>) -> Result<Vec<SimilarityResult>> {
        let mut body = json!({
            "vector": vector,
            "topK": top_k,
            "includeMetadata": true,
            "namespace": self.namespace,
        });
        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = metadata_filter(f);
        }
        let resp = self.http.json("query", Method::POST, "query", Some(&body)).await?;
        let matches = resp["matches"].as_array().cloned().unwrap_or_default();
        Ok(matches
            .into_iter()
            .map(|m| {
                let mut metadata = match m.get("metadata") {
                    Some(Value::Object(o)) => o.clone(),
                    _ => Default::default(),
                };
                let content = match metadata.remove(TEXT_KEY) {
                    Some(Value::String(s)) => s,
                    _ => String::new(),
                };
                SimilarityResult {
                    id: m["id"].as_str().map(str::to_string),
                    content,
                    metadata,
                    score: as_score(m.get("score")).unwrap_or(0.0),
                }
            })
            .collect())
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<usize> {
        let body = match selector {
            DeleteSelector::Ids(ids) if ids.is_empty() => return Ok(0),
            DeleteSelector::Ids(ids) => json!({ "ids": ids, "namespace": self.namespace }),
            DeleteSelector::Document(doc) => json!({
                "filter": { "document_id": { "$eq": doc } },
                "namespace": self.namespace,
            }),
        };
        let before = self.namespace_count(&self.stats("delete").await?);
        self.http.json("delete", Method::POST, "vectors/delete", Some(&body)).await?;
        let after = self.namespace_count(&self.stats("delete").await?);
        let removed = before.saturating_sub(after) as usize;
        if removed == 0 {
            // stats lag behind writes on serverless indexes
            if let DeleteSelector::Ids(ids) = selector {
                warn!(requested = ids.len(), "pinecone stats not yet updated after delete");
                return Ok(ids.len());
            }
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<Option<u64>> {
        Ok(Some(self.namespace_count(&self.stats("count").await?)))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.stats("ping").await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
