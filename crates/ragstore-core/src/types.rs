//! Domain types shared by vector backends, lexical engines and the store.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

pub type DocumentId = String;
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata keys that carry a caller-supplied stable chunk id, in priority order.
pub const ID_KEYS: [&str; 3] = ["id", "chunk_id", "chunkId"];
/// Metadata keys that group chunks under one caller-level document.
pub const DOCUMENT_ID_KEYS: [&str; 2] = ["document_id", "documentId"];

/// Identifies a concrete vector backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Memory,
    LanceDb,
    Sqlite,
    Qdrant,
    Chroma,
    Pinecone,
    Weaviate,
    Milvus,
    Elasticsearch,
}

impl Provider {
    pub const ALL: [Provider; 9] = [
        Provider::Memory,
        Provider::LanceDb,
        Provider::Sqlite,
        Provider::Qdrant,
        Provider::Chroma,
        Provider::Pinecone,
        Provider::Weaviate,
        Provider::Milvus,
        Provider::Elasticsearch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Memory => "memory",
            Provider::LanceDb => "lancedb",
            Provider::Sqlite => "sqlite",
            Provider::Qdrant => "qdrant",
            Provider::Chroma => "chroma",
            Provider::Pinecone => "pinecone",
            Provider::Weaviate => "weaviate",
            Provider::Milvus => "milvus",
            Provider::Elasticsearch => "elasticsearch",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Provider::Memory => "in-memory store",
            Provider::LanceDb => "LanceDB",
            Provider::Sqlite => "SQLite",
            Provider::Qdrant => "Qdrant",
            Provider::Chroma => "Chroma",
            Provider::Pinecone => "Pinecone",
            Provider::Weaviate => "Weaviate",
            Provider::Milvus => "Milvus",
            Provider::Elasticsearch => "Elasticsearch",
        }
    }

    /// Backends that score keywords themselves and need no auxiliary lexical index.
    pub fn has_native_lexical(self) -> bool {
        matches!(self, Provider::Sqlite | Provider::Weaviate | Provider::Elasticsearch)
    }

    /// Default port of a self-hosted server, used in connection error messages.
    pub fn default_port(self) -> Option<u16> {
        match self {
            Provider::Qdrant => Some(6333),
            Provider::Chroma => Some(8000),
            Provider::Weaviate => Some(8080),
            Provider::Milvus => Some(19530),
            Provider::Elasticsearch => Some(9200),
            Provider::Memory | Provider::LanceDb | Provider::Sqlite | Provider::Pinecone => None,
        }
    }

    /// Embedded backends live on the local filesystem rather than behind a network API.
    pub fn is_embedded(self) -> bool {
        matches!(self, Provider::Memory | Provider::LanceDb | Provider::Sqlite)
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str() == lower)
            .ok_or_else(|| crate::error::Error::invalid_config(format!("unknown vector backend '{s}'")))
    }
}

/// A document as supplied by the caller. Never mutated once indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedDocument {
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl IndexedDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self { content: content.into(), metadata: Metadata::new() }
    }

    pub fn with_metadata(content: impl Into<String>, metadata: Metadata) -> Self {
        Self { content: content.into(), metadata }
    }

    /// Caller-supplied stable id, if the metadata carries one.
    pub fn id_hint(&self) -> Option<String> {
        metadata_id(&self.metadata)
    }

    pub fn document_id(&self) -> Option<String> {
        metadata_document_id(&self.metadata)
    }
}

pub fn metadata_id(metadata: &Metadata) -> Option<String> {
    ID_KEYS.iter().find_map(|k| metadata.get(*k).and_then(value_as_key))
}

pub fn metadata_document_id(metadata: &Metadata) -> Option<String> {
    DOCUMENT_ID_KEYS.iter().find_map(|k| metadata.get(*k).and_then(value_as_key))
}

fn value_as_key(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// A document prepared for a vector backend: id, payload and embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: DocumentId,
    pub content: String,
    pub metadata: Metadata,
    pub vector: Vec<f32>,
}

/// Dense-similarity hit. Higher `score` is always more relevant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocumentId>,
    pub content: String,
    pub metadata: Metadata,
    pub score: f32,
}

/// Keyword-relevance hit (BM25-like score, not comparable to similarity).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocumentId>,
    pub content: String,
    pub metadata: Metadata,
    pub score: f32,
}

/// Provenance of a fused hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Vector,
    Lexical,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DocumentId>,
    pub content: String,
    pub metadata: Metadata,
    pub score: f32,
    pub search_type: SearchType,
}

/// Conjunction of metadata equality constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(pub BTreeMap<String, Value>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn equals(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.0.iter().all(|(k, v)| metadata.get(k) == Some(v))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub min_score: Option<f32>,
    #[serde(default)]
    pub filter: Option<Filter>,
}

fn default_top_k() -> usize {
    4
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { top_k: default_top_k(), min_score: None, filter: None }
    }
}

impl SearchOptions {
    pub fn top_k(top_k: usize) -> Self {
        Self { top_k, ..Self::default() }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }
}

/// How the two result lists are merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionStrategy {
    /// Alpha-weighted sum of raw scores.
    #[default]
    Linear,
    /// Reciprocal rank fusion, each list weighted by alpha.
    Rrf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HybridOptions {
    /// 1.0 is pure vector, 0.0 is pure lexical.
    #[serde(default = "default_alpha")]
    pub alpha: f32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default)]
    pub fusion: FusionStrategy,
}

fn default_alpha() -> f32 {
    0.5
}

impl Default for HybridOptions {
    fn default() -> Self {
        Self { alpha: default_alpha(), top_k: default_top_k(), filter: None, fusion: FusionStrategy::Linear }
    }
}

impl HybridOptions {
    pub fn new(alpha: f32, top_k: usize) -> Self {
        Self { alpha, top_k, ..Self::default() }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_fusion(mut self, fusion: FusionStrategy) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn clamped_alpha(&self) -> f32 {
        if self.alpha.is_nan() { default_alpha() } else { self.alpha.clamp(0.0, 1.0) }
    }

    pub fn search_options(&self) -> SearchOptions {
        SearchOptions { top_k: self.top_k, min_score: None, filter: self.filter.clone() }
    }
}

/// Low-level ids or a caller-level document grouping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteSelector {
    Ids(Vec<DocumentId>),
    Document(String),
}

impl DeleteSelector {
    /// `document_id` wins over `ids` when both are given.
    pub fn resolve(ids: &[DocumentId], document_id: Option<&str>) -> Self {
        match document_id {
            Some(doc) if !doc.is_empty() => DeleteSelector::Document(doc.to_string()),
            _ => DeleteSelector::Ids(ids.to_vec()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            DeleteSelector::Ids(ids) => ids.is_empty(),
            DeleteSelector::Document(doc) => doc.is_empty(),
        }
    }

    pub fn matches(&self, id: &str, metadata: &Metadata) -> bool {
        match self {
            DeleteSelector::Ids(ids) => ids.iter().any(|x| x == id),
            DeleteSelector::Document(doc) => metadata_document_id(metadata).as_deref() == Some(doc.as_str()),
        }
    }
}

/// Read-only snapshot; recomputed on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub provider: Provider,
    pub persist_path: String,
    pub table_name: Option<String>,
    pub exists: bool,
    pub supports_full_text_search: bool,
    pub lexical_engine: Option<String>,
    pub document_count: Option<u64>,
}

/// Side-table row kept next to a lexical engine's token index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalIndexEntry {
    pub id: DocumentId,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LexicalStats {
    pub engine: String,
    pub persist_path: Option<String>,
    pub document_count: usize,
    pub persistent: bool,
}

/// Store and lexical-engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Backend feature set reported by each adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub native_lexical: bool,
    pub native_hybrid: bool,
    pub metadata_filter: bool,
    pub auto_persist: bool,
    pub max_batch: Option<usize>,
}

/// A fallback that kept an operation alive at reduced fidelity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Degradation {
    LexicalUnavailable { reason: String },
    LexicalMirrorFailed { reason: String },
    ScoreThresholdRelaxed { min_score: f32, returned: usize },
    NativeHybridFallback { reason: String },
    ClientSideFilter { provider: Provider },
    PersistenceDisabled { reason: String },
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::LexicalUnavailable { reason } => write!(f, "lexical search unavailable: {reason}"),
            Degradation::LexicalMirrorFailed { reason } => write!(f, "lexical index not updated: {reason}"),
            Degradation::ScoreThresholdRelaxed { min_score, returned } => {
                write!(f, "no result reached min score {min_score}; returned {returned} unfiltered results")
            }
            Degradation::NativeHybridFallback { reason } => write!(f, "native hybrid query failed, fused manually: {reason}"),
            Degradation::ClientSideFilter { provider } => write!(f, "{provider} cannot filter metadata; filtered client-side"),
            Degradation::PersistenceDisabled { reason } => write!(f, "lexical index is in-memory only: {reason}"),
        }
    }
}

/// A successful value plus any degradations taken to produce it.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome<T> {
    pub value: T,
    pub degraded: Vec<Degradation>,
}

impl<T> Outcome<T> {
    pub fn ok(value: T) -> Self {
        Self { value, degraded: Vec::new() }
    }

    pub fn with(value: T, degraded: Vec<Degradation>) -> Self {
        Self { value, degraded }
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome { value: f(self.value), degraded: self.degraded }
    }
}

impl<T> Deref for Outcome<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Ids for a batch: explicit ids win, then the metadata id hint, then a fresh UUID v4.
pub fn assign_ids(docs: &[IndexedDocument], ids: Option<&[DocumentId]>) -> crate::error::Result<Vec<DocumentId>> {
    if let Some(ids) = ids {
        if ids.len() != docs.len() {
            return Err(crate::error::Error::invalid_config(format!(
                "got {} ids for {} documents",
                ids.len(),
                docs.len()
            )));
        }
        return Ok(ids.to_vec());
    }
    Ok(docs
        .iter()
        .map(|d| d.id_hint().unwrap_or_else(|| uuid::Uuid::new_v4().to_string()))
        .collect())
}

/// Pairs raw texts with optional per-text metadata.
pub fn documents_from_texts(texts: &[String], metadatas: Option<&[Metadata]>) -> crate::error::Result<Vec<IndexedDocument>> {
    match metadatas {
        Some(m) if m.len() != texts.len() => Err(crate::error::Error::invalid_config(format!(
            "got {} metadata entries for {} texts",
            m.len(),
            texts.len()
        ))),
        Some(m) => Ok(texts.iter().zip(m).map(|(t, m)| IndexedDocument::with_metadata(t.clone(), m.clone())).collect()),
        None => Ok(texts.iter().map(|t| IndexedDocument::new(t.clone())).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(v: Value) -> Metadata {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn id_hint_prefers_id_then_chunk_id() {
        let d = IndexedDocument::with_metadata("x", meta(json!({"chunkId": "c", "chunk_id": "b"})));
        assert_eq!(d.id_hint().as_deref(), Some("b"));
        let d = IndexedDocument::with_metadata("x", meta(json!({"id": 7})));
        assert_eq!(d.id_hint().as_deref(), Some("7"));
        assert_eq!(IndexedDocument::new("x").id_hint(), None);
    }

    #[test]
    fn document_selector_wins_over_ids() {
        let sel = DeleteSelector::resolve(&["a".to_string()], Some("doc-1"));
        assert_eq!(sel, DeleteSelector::Document("doc-1".into()));
        assert!(sel.matches("zzz", &meta(json!({"documentId": "doc-1"}))));
        assert!(!sel.matches("a", &Metadata::new()));
    }

    #[test]
    fn assign_ids_rejects_length_mismatch() {
        let docs = vec![IndexedDocument::new("a"), IndexedDocument::new("b")];
        let err = assign_ids(&docs, Some(&["1".to_string()])).expect_err("mismatch");
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidConfig);
        let ids = assign_ids(&docs, None).expect("ids");
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }

    #[test]
    fn filter_is_a_conjunction() {
        let f = Filter::new().equals("lang", "en").equals("year", 2024);
        assert!(f.matches(&meta(json!({"lang": "en", "year": 2024, "x": 1}))));
        assert!(!f.matches(&meta(json!({"lang": "en"}))));
    }
}
