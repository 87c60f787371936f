use anyhow::Result;
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use ragstore_core::config::WeaviateConfig;
use ragstore_core::error::{classify_message, Error};
use ragstore_core::traits::{NativeHybrid, NativeLexical, VectorBackend};
use ragstore_core::types::{
    metadata_document_id, Capabilities, DeleteSelector, Filter, FusedResult, LexicalResult, Metadata, Provider,
    SearchType, SimilarityResult, VectorRecord,
};

use super::NETWORK_BATCH;
use crate::http::{as_score, point_uuid, Auth, RestClient};

const FIELDS: &str = "content metadata_json chunk_id";

/// Weaviate REST + GraphQL (default port 8080), bring-your-own vectors.
///
/// Metadata is stored as one JSON text property, so filters run client-side;
/// keyword and hybrid queries use Weaviate's own `bm25` and `hybrid` operators.
pub struct WeaviateBackend {
    http: RestClient,
    class: String,
}

/// Weaviate class names are PascalCase and start with a letter.
pub fn class_name(table: &str) -> String {
    let mut out = String::new();
    for part in table.split(|c: char| !c.is_ascii_alphanumeric()).filter(|p| !p.is_empty()) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    if !out.starts_with(|c: char| c.is_ascii_alphabetic()) {
        out.insert(0, 'C');
    }
    out
}

struct Row {
    id: Option<String>,
    content: String,
    metadata: Metadata,
    additional: Value,
}

impl WeaviateBackend {
    pub fn new(config: &WeaviateConfig, table: &str, timeout: Duration) -> Result<Self> {
        let auth = config.api_key.clone().map(Auth::Bearer).unwrap_or_default();
        Ok(Self { http: RestClient::new(Provider::Weaviate, &config.url, timeout, auth)?, class: class_name(table) })
    }

    async fn graphql(&self, op: &str, query: String) -> Result<Value> {
        let resp = self.http.json(op, Method::POST, "v1/graphql", Some(&json!({ "query": query }))).await?;
        if let Some(errors) = resp["errors"].as_array().filter(|e| !e.is_empty()) {
            let detail = errors.iter().filter_map(|e| e["message"].as_str()).collect::<Vec<_>>().join("; ");
            let kind = classify_message(&detail.to_lowercase());
            return Err(Error::backend(Provider::Weaviate, kind, op, detail).into());
        }
        Ok(resp)
    }

    async fn get(&self, op: &str, operator: String, top_k: usize, additional: &str) -> Result<Vec<Row>> {
        let query = format!(
            "{{ Get {{ {class}({operator}, limit: {top_k}) {{ {FIELDS} _additional {{ {additional} }} }} }} }}",
            class = self.class
        );
        let resp = self.graphql(op, query).await?;
        let items = resp["data"]["Get"][self.class.as_str()].as_array().cloned().unwrap_or_default();
        Ok(items
            .into_iter()
            .map(|item| Row {
                id: item["chunk_id"].as_str().map(str::to_string),
                content: item["content"].as_str().unwrap_or_default().to_string(),
                metadata: item["metadata_json"].as_str().and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default(),
                additional: item["_additional"].clone(),
            })
            .collect())
    }
}

#[async_trait]
impl VectorBackend for WeaviateBackend {
    fn provider(&self) -> Provider {
        Provider::Weaviate
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            native_lexical: true,
            native_hybrid: true,
            metadata_filter: false,
            auto_persist: true,
            max_batch: Some(NETWORK_BATCH),
        }
    }

    fn table_name(&self) -> &str {
        &self.class
    }

    fn persist_location(&self) -> String {
        self.http.base_url().to_string()
    }

    async fn exists(&self) -> Result<bool> {
        self.http.probe("class lookup", Method::GET, &format!("v1/schema/{}", self.class), None).await
    }

    async fn create(&self, _dimension: usize) -> Result<()> {
        let keyword = |name: &str| json!({ "name": name, "dataType": ["text"], "tokenization": "field" });
        let body = json!({
            "class": self.class,
            "vectorizer": "none",
            "vectorIndexConfig": { "distance": "cosine" },
            "properties": [
                { "name": "content", "dataType": ["text"] },
                { "name": "metadata_json", "dataType": ["text"], "indexSearchable": false, "indexFilterable": false },
                keyword("chunk_id"),
                keyword("document_id"),
            ],
        });
        self.http.json("create class", Method::POST, "v1/schema", Some(&body)).await?;
        debug!(class = %self.class, "weaviate class created");
        Ok(())
    }

    async fn load(&self) -> Result<()> {
        self.http.json("load class", Method::GET, &format!("v1/schema/{}", self.class), None).await?;
        Ok(())
    }

    async fn insert(&self, records: &[VectorRecord]) -> Result<()> {
        let objects: Vec<Value> = records
            .iter()
            .map(|r| {
                Ok(json!({
                    "class": self.class,
                    "id": point_uuid(&r.id),
                    "vector": r.vector,
                    "properties": {
                        "content": r.content,
                        "metadata_json": serde_json::to_string(&r.metadata)?,
                        "chunk_id": r.id,
                        "document_id": metadata_document_id(&r.metadata),
                    },
                }))
            })
            .collect::<Result<_>>()?;
        let resp = self.http.json("batch insert", Method::POST, "v1/batch/objects", Some(&json!({ "objects": objects }))).await?;
        let failures: Vec<String> = resp
            .as_array()
            .into_iter()
            .flatten()
            .flat_map(|o| o["result"]["errors"]["error"].as_array().cloned().unwrap_or_default())
            .filter_map(|e| e["message"].as_str().map(str::to_string))
            .collect();
        if let Some(first) = failures.first() {
            let kind = classify_message(&first.to_lowercase());
            return Err(Error::backend(
                Provider::Weaviate,
                kind,
                "batch insert",
                format!("{} object(s) rejected: {first}", failures.len()),
            )
            .into());
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], top_k: usize, _filter: Option<&Filter>) -> Result<Vec<SimilarityResult>> {
        let operator = format!("nearVector: {{ vector: {} }}", serde_json::to_string(vector)?);
        let rows = self.get("search", operator, top_k, "distance").await?;
        Ok(rows
            .into_iter()
            .map(|r| SimilarityResult {
                score: 1.0 - as_score(r.additional.get("distance")).unwrap_or(1.0),
                id: r.id,
                content: r.content,
                metadata: r.metadata,
            })
            .collect())
    }

    async fn delete(&self, selector: &DeleteSelector) -> Result<usize> {
        match selector {
            DeleteSelector::Ids(ids) => {
                let mut removed = 0;
                for id in ids {
                    let path = format!("v1/objects/{}/{}", self.class, point_uuid(id));
                    if self.http.probe("delete", Method::DELETE, &path, None).await? {
                        removed += 1;
                    }
                }
                Ok(removed)
            }
            DeleteSelector::Document(doc) => {
                let body = json!({
                    "match": {
                        "class": self.class,
                        "where": { "path": ["document_id"], "operator": "Equal", "valueText": doc },
                    },
                });
                let resp = self.http.json("delete", Method::DELETE, "v1/batch/objects", Some(&body)).await?;
                Ok(resp["results"]["successful"].as_u64().unwrap_or(0) as usize)
            }
        }
    }

    async fn count(&self) -> Result<Option<u64>> {
        let query = format!("{{ Aggregate {{ {} {{ meta {{ count }} }} }} }}", self.class);
        let resp = self.graphql("count", query).await?;
        Ok(resp["data"]["Aggregate"][self.class.as_str()][0]["meta"]["count"].as_u64())
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.http.json("ping", Method::GET, "v1/meta", None).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn as_native_lexical(&self) -> Option<&dyn NativeLexical> {
        Some(self)
    }

    fn as_native_hybrid(&self) -> Option<&dyn NativeHybrid> {
        Some(self)
    }
}

#[async_trait]
impl NativeLexical for WeaviateBackend {
    async fn full_text_search(&self, query: &str, top_k: usize, _filter: Option<&Filter>) -> Result<Vec<LexicalResult>> {
        let operator = format!("bm25: {{ query: {}, properties: [\"content\"] }}", serde_json::to_string(query)?);
        let rows = self.get("full-text search", operator, top_k, "score").await?;
        Ok(rows
            .into_iter()
            .map(|r| LexicalResult {
                score: as_score(r.additional.get("score")).unwrap_or(0.0),
                id: r.id,
                content: r.content,
                metadata: r.metadata,
            })
            .collect())
    }
}

#[async_trait]
impl NativeHybrid for WeaviateBackend {
    async fn hybrid_query(
        &self,
        query: &str,
        vector: &[f32],
        alpha: f32,
        top_k: usize,
        _filter: Option<&Filter>,
    ) -> Result<Vec<FusedResult>> {
        let operator = format!(
            "hybrid: {{ query: {}, vector: {}, alpha: {alpha} }}",
            serde_json::to_string(query)?,
            serde_json::to_string(vector)?
        );
        let search_type = if alpha >= 1.0 {
            SearchType::Vector
        } else if alpha <= 0.0 {
            SearchType::Lexical
        } else {
            SearchType::Hybrid
        };
        let rows = self.get("hybrid search", operator, top_k, "score").await?;
        Ok(rows
            .into_iter()
            .map(|r| FusedResult {
                score: as_score(r.additional.get("score")).unwrap_or(0.0),
                id: r.id,
                content: r.content,
                metadata: r.metadata,
                search_type,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_names_are_pascal_case() {
        assert_eq!(class_name("my-docs_v2"), "MyDocsV2");
        assert_eq!(class_name("docs"), "Docs");
        assert_eq!(class_name("2024-notes"), "C2024Notes");
    }
}
