use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Map, Value};
use std::time::Duration;

use ragstore_core::config::ElasticsearchConfig;
use ragstore_core::error::{classify_message, Error};
use ragstore_core::traits::{NativeLexical, VectorBackend};
use ragstore_core::types::{
    Capabilities, DeleteSelector, Filter, IndexedDocument, LexicalResult, Metadata, Provider, SimilarityResult,
    VectorRecord, DOCUMENT_ID_KEYS,
};

use super::NETWORK_BATCH;
use crate::http::{as_score, metadata_of, Auth, RestClient};

/// Elasticsearch `dense_vector` kNN plus `match` queries (default port 9200).
pub struct ElasticsearchBackend {
    http: RestClient,
    index: String,
}

/// Index names are lowercase and cannot start with `-`, `_` or `+`.
pub fn index_name(table: &str) -> String {
    let mut out: String = table
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '-' })
        .collect();
    while out.starts_with(['-', '_', '+', '.']) {
        out.remove(0);
    }
    if out.is_empty() {
        out.push_str("ragstore");
    }
    out
}

fn flatten_into(prefix: &str, value: Value, out: &mut Metadata) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                flatten_into(&format!("{prefix}.{k}"), v, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other);
        }
    }
}

fn term_filters(filter: Option<&Filter>) -> Vec<Value> {
    filter
        .into_iter()
        .flat_map(|f| f.iter())
        .map(|(k, v)| json!({ "term": { format!("metadata.{k}"): v } }))
        .collect()
}

fn hits(resp: &Value) -> Vec<(Option<String>, String, Metadata, f32)> {
    resp["hits"]["hits"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|h| {
            let source = &h["_source"];
            (
                h["_id"].as_str().map(str::to_string),
                source["content"].as_str().unwrap_or_default().to_string(),
                metadata_of(source.get("metadata")),
                as_score(h.get("_score")).unwrap_or(0.0),
            )
        })
        .collect()
}

impl ElasticsearchBackend {
    pub fn new(config: &ElasticsearchConfig, table: &str, timeout: Duration) -> Result<Self> {
        let auth = match (&config.api_key, &config.username, &config.password) {
            (Some(key), _, _) => Auth::Header("Authorization", format!("ApiKey {key}")),
            (None, Some(username), Some(password)) => {
                Auth::Basic { username: username.clone(), password: password.clone() }
            }
            _ => Auth::None,
        };
        Ok(Self { http: RestClient::new(Provider::Elasticsearch, &config.url, timeout, auth)?, index: index_name(table) })
    }

    fn document_query(doc: &str) -> Value {
        let any: Vec<Value> =
            DOCUMENT_ID_KEYS.iter().map(|k| json!({ "term": { format!("metadata.{k}"): doc } })).collect();
        json!({ "bool": { "should": any, "minimum_should_match": 1 } })
    }
}

#[async_trait]
impl VectorBackend for ElasticsearchBackend {
    fn provider(&self) -> Provider {
        Provider::Elasticsearch
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_lexical: true,
            metadata_filter: true,
            auto_persist: true,
            max_batch: Some(NETWORK_BATCH),
            ..Capabilities::default()
        }
    }

    fn table_name(&self) -> &str {
        &self.index
    }

    fn persist_location(&self) -> String {
        self.http.base_url().to_string()
    }

    async fn exists(&self) -> Result<bool> {
        self.http.probe("index lookup", Method::HEAD, &self.index, None).await
    }

    async fn create(&self, dimension: usize) -> Result<()> {
        let body = json!({
            "mappings": {
                "dynamic_templates": [{
                    "metadata_strings": {
                        "path_match": "metadata.*",
                        "match_mapping_type": "string",
                        "mapping": { "type": "keyword" },
                    },
                }],
                "properties": {
                    "content": { "type": "text" },
                    "metadata": { "type": "object", "dynamic": true },
                    "vector": { "type": "dense_vector", "dims": dimension, "index": true, "similarity": "cosine" },
                },
            },
        });
        self.http.json("create index", Method::PUT, &self.index, Some(&body)).await?;
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        self.http.json("load index", Method::GET, &self.index, None).await?;
        Ok(())
    }

    /// Nested objects become dotted keys so term filters can address them.
    fn normalize(&self, doc: &mut IndexedDocument) {
        if !doc.metadata.values().any(Value::is_object) {
            return;
        }
        let mut flat = Map::new();
        for (k, v) in std::mem::take(&mut doc.metadata) {
            flatten_into(&k, v, &mut flat);
        }
        doc.metadata = flat;
    }

    async fn insert(&self, records: &[VectorRecord]) -> Result<()> {
        let mut body = String::new();
        for r in records {
            body.push_str(&json!({ "index": { "_index": self.index, "_id": r.id } }).to_string());
            body.push('\n');
            body.push_str(&json!({ "content": r.content, "metadata": r.metadata, "vector": r.vector }).to_string());
            body.push('\n');
        }
        let resp = self.http.raw("bulk insert", Method::POST, "_bulk?refresh=true", "application/x-ndjson", body).await?;
        if resp["errors"].as_bool().unwrap_or(false) {
            let first = resp["items"]
                .as_array()
                .into_iter()
                .flatten()
                .find_map(|i| i["index"]["error"]["reason"].as_str())
                .unwrap_or("bulk request reported errors")
                .to_string();
            let kind = classify_message(&first.to_lowercase());
            return Err(Error::backend(Provider::Elasticsearch, kind, "bulk insert", first).into());
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize, filter: Option<&Filter>) -> Result<Vec<SimilarityResult>> {
        let mut knn = json!({
            "field": "vector",
            "query_vector": vector,
            "k": top_k,
            "num_candidates": (top_k * 10).max(100),
        });
        let terms = term_filters(filter);
        if !terms.is_empty() {
            knn["filter"] = json!({ "bool": { "filter": terms } });
        }
        let body = json!({ "knn": knn, "size": top_k, "_source": ["content", "metadata"] });
        let resp = self.http.json("search", Method::POST, &format!("{}/_search", self.index), Some(&body)).await?;
        // cosine kNN scores are (1 + cos) / 2
        Ok(hits(&resp)
            .into_iter()
            .map(|(id, content, metadata, score)| SimilarityResult { id, content, metadata, score: 2.0 * score - 1.0 })
            .collect())
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<usize> {
        let query = match selector {
            DeleteSelector::Ids(ids) if ids.is_empty() => return Ok(0),
            DeleteSelector::Ids(ids) => json!({ "ids": { "values": ids } }),
            DeleteSelector::Document(doc) => Self::document_query(doc),
        };
        let path = format!("{}/_delete_by_query?refresh=true", self.index);
        let resp = self.http.json("delete", Method::POST, &path, Some(&json!({ "query": query }))).await?;
        Ok(resp["deleted"].as_u64().unwrap_or(0) as usize)
    }

    async fn count(&self) -> Result<Option<u64>> {
        let resp = self.http.json("count", Method::GET, &format!("{}/_count", self.index), None).await?;
        Ok(resp["count"].as_u64())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.http.json("ping", Method::GET, "", None).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn as_native_lexical(&self) -> Option<&dyn NativeLexical> {
        Some(self)
    }
}

#[async_trait]
impl NativeLexical for ElasticsearchBackend {
    async fn full_text_search(&self, query: &str, top_k: usize, filter: Option<&Filter>) -> Result<Vec<LexicalResult>> {
        let body = json!({
            "query": {
                "bool": {
                    "must": { "match": { "content": query } },
                    "filter": term_filters(filter),
                },
            },
            "size": top_k,
            "_source": ["content", "metadata"],
        });
        let resp =
            self.http.json("full-text search", Method::POST, &format!("{}/_search", self.index), Some(&body)).await?;
        Ok(hits(&resp)
            .into_iter()
            .map(|(id, content, metadata, score)| LexicalResult { id, content, metadata, score })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_metadata_is_flattened() {
        let backend = ElasticsearchBackend::new(
            &ElasticsearchConfig {
                url: "http://localhost:9200".into(),
                api_key: None,
                username: None,
                password: None,
                timeout_secs: None,
            },
            "Docs",
            Duration::from_secs(1),
        )
        .expect("backend");
        assert_eq!(backend.table_name(), "docs");
        let mut doc = IndexedDocument::with_metadata(
            "x",
            json!({"author": {"name": "ada", "born": 1815}, "tag": "math"}).as_object().cloned().unwrap_or_default(),
        );
        backend.normalize(&mut doc);
        assert_eq!(doc.metadata.get("author.name"), Some(&json!("ada")));
        assert_eq!(doc.metadata.get("author.born"), Some(&json!(1815)));
        assert_eq!(doc.metadata.get("tag"), Some(&json!("math")));
    }

    #[test]
    fn index_names_are_lowercased() {
        assert_eq!(index_name("_My Docs"), "my-docs");
    }
}
