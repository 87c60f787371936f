use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use ragstore_core::config::MilvusConfig;
use ragstore_core::error::{classify_message, Error, ErrorKind};
use ragstore_core::traits::VectorBackend;
use ragstore_core::types::{
    Capabilities, DeleteSelector, Filter, Provider, SimilarityResult, VectorRecord, DOCUMENT_ID_KEYS,
};

use super::NETWORK_BATCH;
use crate::http::{as_score, metadata_of, Auth, RestClient};

const ID_MAX_LENGTH: u32 = 512;

/// Milvus RESTful API v2 (default port 19530).
///
/// Every response is HTTP 200 with a `code`; a non-zero code is a failure.
/// Metadata lives in a JSON field and filters use Milvus boolean expressions.
pub struct MilvusBackend {
    http: RestClient,
    collection: String,
    database: Option<String>,
}

fn literal(v: &Value) -> String {
    // JSON scalars are valid Milvus expression literals
    v.to_string()
}

/// `metadata["k"] == v and ...`
pub fn filter_expr(filter: &Filter) -> String {
    filter
        .iter()
        .map(|(k, v)| format!("metadata[{}] == {}", literal(&Value::String(k.clone())), literal(v)))
        .collect::<Vec<_>>()
        .join(" and ")
}

fn id_list(ids: &[String]) -> String {
    ids.iter().map(|i| literal(&Value::String(i.clone()))).collect::<Vec<_>>().join(", ")
}

/// Milvus collection names allow letters, digits and underscores.
pub fn collection_name(table: &str) -> String {
    let mut out: String = table.chars().map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' }).collect();
    if !out.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        out.insert(0, '_');
    }
    out
}

impl MilvusBackend {
    pub fn new(config: &MilvusConfig, table: &str, timeout: Duration) -> Result<Self> {
        let auth = config.token.clone().map(Auth::Bearer).unwrap_or_default();
        Ok(Self {
            http: RestClient::new(Provider::Milvus, &config.url, timeout, auth)?,
            collection: collection_name(table),
            database: config.database.clone(),
        })
    }

    fn body(&self, mut body: Value) -> Value {
        body["collectionName"] = json!(self.collection);
        if let Some(db) = &self.database {
            body["dbName"] = json!(db);
        }
        body
    }

    async fn call(&self, op: &str, path: &str, body: Value) -> Result<Value> {
        let resp = self.http.json(op, Method::POST, &format!("v2/vectordb/{path}"), Some(&self.body(body))).await?;
        match resp["code"].as_i64() {
            Some(0) | None => Ok(resp),
            Some(code) => {
                let message = resp["message"].as_str().unwrap_or("unknown error").to_string();
                let kind = match classify_message(&message.to_lowercase()) {
                    ErrorKind::EmbeddingConfig => ErrorKind::Operation,
                    // 1800: user hasn't authenticated
                    _ if code == 1800 => ErrorKind::Authentication,
                    kind => kind,
                };
                Err(Error::backend(Provider::Milvus, kind, op, format!("code {code}: {message}")).into())
            }
        }
    }

    async fn row_count(&self, op: &str, filter: &str) -> Result<u64> {
        let resp = self.call(op, "entities/query", json!({ "filter": filter, "outputFields": ["count(*)"] })).await?;
        Ok(resp["data"][0]["count(*)"].as_u64().unwrap_or(0))
    }
}

#[async_trait]
impl VectorBackend for MilvusBackend {
    fn provider(&self) -> Provider {
        Provider::Milvus
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
        let resp = self.call("collection lookup", "collections/has", json!({})).await?;
        Ok(resp["data"]["has"].as_bool().unwrap_or(false))
    }

    async fn create(&self, dimension: usize) -> Result<()> {
        let body = json!({
            "schema": {
                "autoId": false,
                "enableDynamicField": false,
                "fields": [
                    { "fieldName": "id", "dataType": "VarChar", "isPrimary": true, "elementTypeParams": { "max_length": ID_MAX_LENGTH } },
                    { "fieldName": "vector", "dataType": "FloatVector", "elementTypeParams": { "dim": dimension } },
                    { "fieldName": "content", "dataType": "VarChar", "elementTypeParams": { "max_length": 65535 } },
                    { "fieldName": "metadata", "dataType": "JSON" },
                ],
            },
            "indexParams": [{ "fieldName": "vector", "indexName": "vector", "metricType": "COSINE" }],
        });
        self.call("create collection", "collections/create", body).await?;
        debug!(collection = %self.collection, dimension, "milvus collection created");
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        self.call("load collection", "collections/load", json!({})).await?;
        Ok(())
    }

    async fn insert(&self, records: &[VectorRecord]) -> Result<()> {
        let data: Vec<Value> = records
            .iter()
            .map(|r| json!({ "id": r.id, "vector": r.vector, "content": r.content, "metadata": r.metadata }))
            .collect();
        self.call("upsert", "entities/upsert", json!({ "data": data })).await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize, filter: Option<&Filter>) -> Result<Vec<SimilarityResult>> {
        let mut body = json!({
            "data": [vector],
            "annsField": "vector",
            "limit": top_k,
            "outputFields": ["content", "metadata"],
        });
        if let Some(f) = filter.filter(|f| !f.is_empty()) {
            body["filter"] = json!(filter_expr(f));
        }
        let resp = self.call("search", "entities/search", body).await?;
        let hits = resp["data"].as_array().cloned().unwrap_or_default();
        // COSINE "distance" is already a similarity
        Ok(hits
            .iter()
            .map(|h| SimilarityResult {
                id: h["id"].as_str().map(str::to_string),
                content: h["content"].as_str().unwrap_or_default().to_string(),
                metadata: metadata_of(h.get("metadata")),
                score: as_score(h.get("distance")).unwrap_or(0.0),
            })
            .collect())
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<usize> {
        let expr = match selector {
            DeleteSelector::Ids(ids) if ids.is_empty() => return Ok(0),
            DeleteSelector::Ids(ids) => format!("id in [{}]", id_list(ids)),
            DeleteSelector::Document(doc) => DOCUMENT_ID_KEYS
                .iter()
                .map(|k| format!("metadata[{}] == {}", literal(&json!(k)), literal(&json!(doc))))
                .collect::<Vec<_>>()
                .join(" or "),
        };
        let matching = self.row_count("delete", &expr).await?;
        self.call("delete", "entities/delete", json!({ "filter": expr })).await?;
        Ok(matching as usize)
    }

    async fn count(&self) -> Result<Option<u64>> {
        Ok(Some(self.row_count("count", "").await?))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.call("ping", "collections/list", json!({})).await?;
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
    fn expressions_quote_strings() {
        let f = Filter::new().equals("lang", "en").equals("rank", 2);
        assert_eq!(filter_expr(&f), r#"metadata["lang"] == "en" and metadata["rank"] == 2"#);
        assert_eq!(id_list(&["a".into(), "b\"c".into()]), r#""a", "b\"c""#);
        assert_eq!(collection_name("my-docs"), "my_docs");
        assert_eq!(collection_name("9lives"), "_9lives");
    }
}
