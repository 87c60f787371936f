use async_trait::async_trait;
use std::path::PathBuf;

use crate::config::LexicalEngineKind;
use crate::error::{EmbeddingError, Result};
use crate::types::{
    documents_from_texts, Capabilities, DeleteSelector, DocumentId, Filter, FusedResult, IndexedDocument,
    LexicalResult, LexicalStats, Metadata, Outcome, Provider, SimilarityResult, VectorRecord,
};

/// Text-to-vector capability injected into the store.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    async fn embed_query(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError>;
    async fn embed_batch(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// One vector database. Adapters report failures through `anyhow`; the store
/// translates them into the public taxonomy with the adapter's provider.
#[async_trait]
pub trait VectorBackend: Send + Sync {
    fn provider(&self) -> Provider;
    fn capabilities(&self) -> Capabilities;
    fn table_name(&self) -> &str;
    /// Path or URL shown in stats.
    fn persist_location(&self) -> String;

    async fn exists(&self) -> anyhow::Result<bool>;
    async fn create(&self, dimension: usize) -> anyhow::Result<()>;
    async fn load(&self) -> anyhow::Result<()>;

    /// Backend-specific metadata shaping (e.g. flattening for keyword fields).
    fn normalize(&self, _doc: &mut IndexedDocument) {}

    async fn insert(&self, records: &[VectorRecord]) -> anyhow::Result<()>;
    /// `filter` is only honoured when `capabilities().metadata_filter` is set.
    async fn query(&self, vector: &[f32], top_k: usize, filter: Option<&Filter>) -> anyhow::Result<Vec<SimilarityResult>>;
    async fn delete(&self, selector: &DeleteSelector) -> anyhow::Result<usize>;
    async fn count(&self) -> anyhow::Result<Option<u64>>;
    async fn flush(&self) -> anyhow::Result<()>;
    async fn ping(&self) -> anyhow::Result<()>;
    async fn close(&self) -> anyhow::Result<()>;

    fn as_native_lexical(&self) -> Option<&dyn NativeLexical> {
        None
    }

    fn as_native_hybrid(&self) -> Option<&dyn NativeHybrid> {
        None
    }
}

/// Keyword scoring performed by the backend itself.
#[async_trait]
pub trait NativeLexical: Send + Sync {
    async fn full_text_search(&self, query: &str, top_k: usize, filter: Option<&Filter>) -> anyhow::Result<Vec<LexicalResult>>;
}

/// Single-request hybrid query performed by the backend itself.
#[async_trait]
pub trait NativeHybrid: Send + Sync {
    async fn hybrid_query(
        &self,
        query: &str,
        vector: &[f32],
        alpha: f32,
        top_k: usize,
        filter: Option<&Filter>,
    ) -> anyhow::Result<Vec<FusedResult>>;
}

/// Keyword index with its own lifecycle and persistence.
#[async_trait]
pub trait LexicalEngine: Send + Sync {
    fn kind(&self) -> LexicalEngineKind;
    fn persist_dir(&self) -> Option<PathBuf>;

    /// `true` when an existing index was loaded.
    async fn initialize(&self) -> Result<Outcome<bool>>;
    async fn add_documents(&self, docs: &[IndexedDocument], ids: Option<&[DocumentId]>) -> Result<Vec<DocumentId>>;

    async fn add_texts(
        &self,
        texts: &[String],
        metadatas: Option<&[Metadata]>,
        ids: Option<&[DocumentId]>,
    ) -> Result<Vec<DocumentId>> {
        let docs = documents_from_texts(texts, metadatas)?;
        self.add_documents(&docs, ids).await
    }

    async fn search(&self, query: &str, top_k: usize, filter: Option<&Filter>) -> Result<Vec<LexicalResult>>;
    async fn delete(&self, selector: &DeleteSelector) -> Result<usize>;
    async fn clear(&self) -> Result<()>;
    async fn save(&self) -> Result<()>;
    async fn get_stats(&self) -> Result<LexicalStats>;
    async fn close(&self) -> Result<()>;
}
