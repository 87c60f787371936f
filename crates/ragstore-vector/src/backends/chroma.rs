use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use ragstore_core::config::ChromaConfig;
use ragstore_core::traits::VectorBackend;
use ragstore_core::types::{
    Capabilities, DeleteSelector, Filter, IndexedDocument, Provider, SimilarityResult, VectorRecord,
    DOCUMENT_ID_KEYS,
};

use super::NETWORK_BATCH;
use crate::http::{as_score, metadata_of, Auth, RestClient};

const DEFAULT_TENANT: &str = "default_tenant";
const DEFAULT_DATABASE: &str = "default_database";

/// Chroma v2 REST API (default port 8000).
///
/// Collections are addressed by server-assigned id, resolved from the name
/// on `create`/`load` and cached.
pub struct ChromaBackend {
    http: RestClient,
    tenant: String,
    database: String,
    collection: String,
    collection_id: Mutex<Option<String>>,
}

/// Chroma's `where` clause: one `$eq` per key, `$and` when more than one.
pub fn where_clause(filter: &Filter) -> Option<Value> {
    let mut clauses: Vec<Value> = filter.iter().map(|(k, v)| json!({ k.as_str(): { "$eq": v } })).collect();
    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(json!({ "$and": clauses })),
    }
}

impl ChromaBackend {
    pub fn new(config: &ChromaConfig, collection: &str, timeout: Duration) -> Result<Self> {
        let auth = config.auth_token.clone().map(Auth::Bearer).unwrap_or_default();
        Ok(Self {
            http: RestClient::new(Provider::Chroma, &config.url, timeout, auth)?,
            tenant: config.tenant.clone().unwrap_or_else(|| DEFAULT_TENANT.to_string()),
            database: config.database.clone().unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
            collection: collection.to_string(),
            collection_id: Mutex::new(None),
        })
    }

    fn collections_path(&self) -> String {
        format!("api/v2/tenants/{}/databases/{}/collections", self.tenant, self.database)
    }

    fn remember(&self, resp: &Value) -> Result<String> {
        let id = resp["id"].as_str().ok_or_else(|| anyhow!("chroma response has no collection id"))?.to_string();
        *self.collection_id.lock() = Some(id.clone());
        Ok(id)
    }

    async fn id(&self) -> Result<String> {
        let cached = self.collection_id.lock().clone();
        if let Some(id) = cached {
            return Ok(id);
        }
        let path = format!("{}/{}", self.collections_path(), self.collection);
        let resp = self.http.json("load collection", Method::GET, &path, None).await?;
        self.remember(&resp)
    }

    async fn collection_path(&self, rest: &str) -> Result<String> {
        Ok(format!("{}/{}/{rest}", self.collections_path(), self.id().await?))
    }

    async fn record_count(&self, op: &str) -> Result<u64> {
        let path = self.collection_path("count").await?;
        let resp = self.http.json(op, Method::GET, &path, None).await?;
        Ok(resp.as_u64().unwrap_or(0))
    }
}

#[async_trait]
impl VectorBackend for ChromaBackend {
    fn provider(&self) -> Provider {
        Provider::Chroma
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
        let path = format!("{}/{}", self.collections_path(), self.collection);
        self.http.probe("collection lookup", Method::GET, &path, None).await
    }

    async fn create(&self, _dimension: usize) -> Result<()> {
        let body = json!({
            "name": self.collection,
            "metadata": { "hnsw:space": "cosine" },
            "get_or_create": true,
        });
        let resp = self.http.json("create collection", Method::POST, &self.collections_path(), Some(&body)).await?;
        let id = self.remember(&resp)?;
        debug!(collection = %self.collection, id, "chroma collection ready");
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        self.collection_id.lock().take();
        self.id().await?;
        Ok(())
    }

    /// Chroma metadata values must be scalars; nested values are stored as JSON text.
    fn normalize(&self, doc: &mut IndexedDocument) {
        doc.metadata.retain(|_, v| !v.is_null());
        for v in doc.metadata.values_mut() {
            if v.is_array() || v.is_object() {
                *v = Value::String(v.to_string());
            }
        }
    }

    async fn insert(&self, records: &[VectorRecord]) -> Result<()> {
        let body = json!({
            "ids": records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            "embeddings": records.iter().map(|r| &r.vector).collect::<Vec<_>>(),
            "documents": records.iter().map(|r| r.content.as_str()).collect::<Vec<_>>(),
            "metadatas": records.iter().map(|r| &r.metadata).collect::<Vec<_>>(),
        });
        let path = self.collection_path("upsert").await?;
        self.http.json("upsert", Method::POST, &path, Some(&body)).await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize, filter: Option<&Filter>) -> Result<Vec<SimilarityResult>> {
        let mut body = json!({
            "query_embeddings": [vector],
            "n_results": top_k,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(w) = filter.and_then(where_clause) {
            body["where"] = w;
        }
        let path = self.collection_path("query").await?;
        let resp = self.http.json("query", Method::POST, &path, Some(&body)).await?;
        let column = |name: &str| resp[name][0].as_array().cloned().unwrap_or_default();
        let (ids, documents, metadatas, distances) =
            (column("ids"), column("documents"), column("metadatas"), column("distances"));
        Ok(ids
            .iter()
            .enumerate()
            .map(|(i, id)| SimilarityResult {
                id: id.as_str().map(str::to_string),
                content: documents.get(i).and_then(Value::as_str).unwrap_or_default().to_string(),
                metadata: metadata_of(metadatas.get(i)),
                score: 1.0 - as_score(distances.get(i)).unwrap_or(1.0),
            })
            .collect())
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<usize> {
        let body = match selector {
            DeleteSelector::Ids(ids) if ids.is_empty() => return Ok(0),
            DeleteSelector::Ids(ids) => json!({ "ids": ids }),
            DeleteSelector::Document(doc) => {
                let any: Vec<Value> = DOCUMENT_ID_KEYS.iter().map(|k| json!({ *k: { "$eq": doc } })).collect();
                json!({ "where": { "$or": any } })
            }
        };
        let before = self.record_count("delete").await?;
        let path = self.collection_path("delete").await?;
        self.http.json("delete", Method::POST, &path, Some(&body)).await?;
        let after = self.record_count("delete").await?;
        Ok(before.saturating_sub(after) as usize)
    }

    async fn count(&self) -> Result<Option<u64>> {
        Ok(Some(self.record_count("count").await?))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.http.json("heartbeat", Method::GET, "api/v2/heartbeat", None).await?;
        // heartbeat is unauthenticated; listing collections checks the token
        self.http.json("ping", Method::GET, &self.collections_path(), None).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn where_clause_shapes() {
        assert_eq!(where_clause(&Filter::new()), None);
        assert_eq!(where_clause(&Filter::new().equals("a", 1)), Some(json!({"a": {"$eq": 1}})));
        assert_eq!(
            where_clause(&Filter::new().equals("a", 1).equals("b", "x")),
            Some(json!({"$and": [{"a": {"$eq": 1}}, {"b": {"$eq": "x"}}]}))
        );
    }
}
