use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;

use ragstore_core::config::QdrantConfig;
use ragstore_core::traits::VectorBackend;
use ragstore_core::types::{
    Capabilities, DeleteSelector, Filter, Provider, SimilarityResult, VectorRecord, DOCUMENT_ID_KEYS,
};

use super::NETWORK_BATCH;
use crate::http::{as_score, metadata_of, point_uuid, Auth, RestClient};

/// Qdrant over its REST API (default port 6333).
///
/// Point ids must be UUIDs, so the chunk id is kept in the payload and the
/// point id is derived from it.
pub struct QdrantBackend {
    http: RestClient,
    collection: String,
}

fn payload_filter(filter: &Filter) -> Value {
    let must: Vec<Value> =
        filter.iter().map(|(k, v)| json!({"key": format!("metadata.{k}"), "match": {"value": v}})).collect();
    json!({ "must": must })
}

fn document_filter(doc: &str) -> Value {
    let should: Vec<Value> = DOCUMENT_ID_KEYS
        .iter()
        .map(|k| json!({"key": format!("metadata.{k}"), "match": {"value": doc}}))
        .collect();
    json!({ "should": should })
}

impl QdrantBackend {
    pub fn new(config: &QdrantConfig, collection: &str, timeout: Duration) -> Result<Self> {
        let auth = config.api_key.clone().map(|k| Auth::Header("api-key", k)).unwrap_or_default();
        Ok(Self { http: RestClient::new(Provider::Qdrant, &config.url, timeout, auth)?, collection: collection.to_string() })
    }

    fn path(&self, rest: &str) -> String {
        format!("collections/{}{rest}", self.collection)
    }

    async fn exact_count(&self, op: &str) -> Result<u64> {
        let body = json!({ "exact": true });
        let resp = self.http.json(op, Method::POST, &self.path("/points/count"), Some(&body)).await?;
        Ok(resp["result"]["count"].as_u64().unwrap_or(0))
    }
}

#[async_trait]
impl VectorBackend for QdrantBackend {
    fn provider(&self) -> Provider {
        Provider::Qdrant
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities { metadata_filter: true, auto_persist: true, max_batch: Some(NETWORK_BATCH), ..Capabilities::default() }
    }

    fn table_name(&self) -> &str {
        &self.collection
    }

    fn persist_location(&self) -> String {
        self.http.base_url().to_string()
    }

    async fn exists(&self) -> Result<bool> {
        self.http.probe("collection lookup", Method::GET, &self.path(""), None).await
    }

    async fn create(&self, dimension: usize) -> Result<()> {
        let body = json!({ "vectors": { "size": dimension, "distance": "Cosine" } });
        self.http.json("create collection", Method::PUT, &self.path(""), Some(&body)).await?;
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        self.http.json("load collection", Method::GET, &self.path(""), None).await?;
        Ok(())
    }

    async fn insert(&self, records: &[VectorRecord]) -> Result<()> {
        let points: Vec<Value> = records
            .iter()
            .map(|r| {
                json!({
                    "id": point_uuid(&r.id),
                    "vector": r.vector,
                    "payload": { "chunk_id": r.id, "content": r.content, "metadata": r.metadata },
                })
            })
            .collect();
        let body = json!({ "points": points });
        self.http.json("upsert", Method::PUT, &self.path("/points?wait=true"), Some(&body)).await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize, filter: Option<&Filter>) -> Result<Vec<SimilarityResult>> {
        let mut body = json!({ "vector": vector, "limit": top_k, "with_payload": true });
        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = payload_filter(f);
        }
        let resp = self.http.json("search", Method::POST, &self.path("/points/search"), Some(&body)).await?;
        let hits = resp["result"].as_array().cloned().unwrap_or_default();
        Ok(hits
            .iter()
            .map(|h| {
                let payload = &h["payload"];
                SimilarityResult {
                    id: payload["chunk_id"].as_str().map(str::to_string).or_else(|| h["id"].as_str().map(str::to_string)),
                    content: payload["content"].as_str().unwrap_or_default().to_string(),
                    metadata: metadata_of(payload.get("metadata")),
                    score: as_score(h.get("score")).unwrap_or(0.0),
                }
            })
            .collect())
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<usize> {
        let before = self.exact_count("delete").await?;
        let body = match selector {
            DeleteSelector::Ids(ids) if ids.is_empty() => return Ok(0),
            DeleteSelector::Ids(ids) => json!({ "points": ids.iter().map(|i| point_uuid(i)).collect::<Vec<_>>() }),
            DeleteSelector::Document(doc) => json!({ "filter": document_filter(doc) }),
        };
        self.http.json("delete", Method::POST, &self.path("/points/delete?wait=true"), Some(&body)).await?;
        let after = self.exact_count("delete").await?;
        Ok(before.saturating_sub(after) as usize)
    }

    async fn count(&self) -> Result<Option<u64>> {
        Ok(Some(self.exact_count("count").await?))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.http.json("ping", Method::GET, "collections", None).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
