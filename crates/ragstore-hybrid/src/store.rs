use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use ragstore_core::config::StoreConfig;
use ragstore_core::error::{translate, EmbeddingError, Error, Result};
use ragstore_core::fusion::{fuse, fuse_reciprocal_rank};
use ragstore_core::resolver::{resolve_lexical, LexicalMode};
use ragstore_core::traits::{Embedder, LexicalEngine, VectorBackend};
use ragstore_core::types::{
    assign_ids, documents_from_texts, Capabilities, Degradation, DeleteSelector, DocumentId, Filter, FusedResult,
    FusionStrategy, HybridOptions, IndexedDocument, LexicalResult, LifecycleState, Metadata, Outcome, Provider,
    SearchOptions, SimilarityResult, StoreStats, VectorRecord,
};
use ragstore_lexical::{LexicalLocation, LexicalStore};

/// Candidates fetched per requested hit when filtering happens here.
const OVERFETCH: usize = 4;

trait Scored {
    fn score(&self) -> f32;
    fn metadata(&self) -> &Metadata;
}

macro_rules! scored {
    ($($t:ty),*) => {$(
        impl Scored for $t {
            fn score(&self) -> f32 {
                self.score
            }
            fn metadata(&self) -> &Metadata {
                &self.metadata
            }
        }
    )*};
}

scored!(SimilarityResult, LexicalResult, FusedResult);

fn sort_desc<T: Scored>(hits: &mut [T]) {
    hits.sort_by(|a, b| b.score().total_cmp(&a.score()));
}

fn filter_in_place<T: Scored>(hits: &mut Vec<T>, filter: Option<&Filter>) {
    if let Some(f) = filter {
        hits.retain(|h| f.matches(h.metadata()));
    }
}

struct Lifecycle {
    state: LifecycleState,
    loaded: bool,
}

/// One project's index: a vector backend, the embedder that feeds it and,
/// when the backend cannot score keywords itself, an owned lexical index.
///
/// Constructed inert; the first operation (or [`VectorStore::initialize`])
/// decides between loading and creating the collection.
pub struct VectorStore {
    config: StoreConfig,
    backend: Box<dyn VectorBackend>,
    embedder: Arc<dyn Embedder>,
    lexical_mode: LexicalMode,
    lexical: Option<Box<dyn LexicalEngine>>,
    /// Set when the owned lexical index failed to open; it is skipped until the next open.
    lexical_down: AtomicBool,
    lifecycle: Mutex<Lifecycle>,
}

impl VectorStore {
    pub fn new(config: StoreConfig, backend: Box<dyn VectorBackend>, embedder: Arc<dyn Embedder>) -> Self {
        let provider = backend.provider();
        let lexical_mode = resolve_lexical(provider, config.lexical).mode;
        let lexical = lexical_mode.engine().map(|kind| {
            let location = LexicalLocation::new(
                config.data_dir(),
                config.project_id.clone(),
                format!("{provider}-{}", config.table_name()),
            );
            Box::new(LexicalStore::new(kind, Some(location), config.lexical_settings.clone())) as Box<dyn LexicalEngine>
        });
        Self {
            config,
            backend,
            embedder,
            lexical_mode,
            lexical,
            lexical_down: AtomicBool::new(false),
            lifecycle: Mutex::new(Lifecycle { state: LifecycleState::Uninitialized, loaded: false }),
        }
    }

    /// Replaces the owned lexical index with a caller-built engine.
    pub fn with_lexical_engine(mut self, engine: Box<dyn LexicalEngine>) -> Self {
        self.lexical_mode = LexicalMode::Engine(engine.kind());
        self.lexical = Some(engine);
        self
    }

    pub fn provider(&self) -> Provider {
        self.backend.provider()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.backend.capabilities()
    }

    pub fn lexical_mode(&self) -> LexicalMode {
        self.lexical_mode
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.lock().await.state
    }

    /// Whether keyword and hybrid queries can run at all.
    pub fn supports_full_text_search(&self) -> bool {
        match self.lexical_mode {
            LexicalMode::Native => self.backend.as_native_lexical().is_some(),
            LexicalMode::Engine(_) => self.owned_lexical().is_some(),
            LexicalMode::None => false,
        }
    }

    fn owned_lexical(&self) -> Option<&dyn LexicalEngine> {
        self.lexical.as_deref().filter(|_| !self.lexical_down.load(Ordering::Acquire))
    }

    fn backend_error(&self, op: &'static str) -> impl Fn(anyhow::Error) -> Error + '_ {
        move |e| translate(self.provider(), op, e)
    }

    /// `Ok(true)` when an existing collection was loaded. A second call is a no-op.
    pub async fn initialize(&self) -> Result<Outcome<bool>> {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.state {
            LifecycleState::Ready => Ok(Outcome::ok(lifecycle.loaded)),
            LifecycleState::Closed => Err(Error::closed("vector store")),
            LifecycleState::Uninitialized | LifecycleState::Initializing => self.open(&mut lifecycle).await,
        }
    }

    async fn open(&self, lifecycle: &mut Lifecycle) -> Result<Outcome<bool>> {
        lifecycle.state = LifecycleState::Initializing;
        match self.open_inner().await {
            Ok(outcome) => {
                lifecycle.state = LifecycleState::Ready;
                lifecycle.loaded = outcome.value;
                Ok(outcome)
            }
            Err(e) => {
                lifecycle.state = LifecycleState::Uninitialized;
                Err(e)
            }
        }
    }

    async fn open_inner(&self) -> Result<Outcome<bool>> {
        let exists = self.backend.exists().await.map_err(self.backend_error("initialize"))?;
        if exists {
            self.backend.load().await.map_err(self.backend_error("load collection"))?;
        } else {
            self.backend.create(self.embedder.dimension()).await.map_err(self.backend_error("create collection"))?;
        }

        let mut degraded = Vec::new();
        if let Some(engine) = &self.lexical {
            match engine.initialize().await {
                Ok(outcome) => {
                    self.lexical_down.store(false, Ordering::Release);
                    degraded.extend(outcome.degraded);
                }
                Err(e) => {
                    self.lexical_down.store(true, Ordering::Release);
                    warn!(provider = %self.provider(), engine = %engine.kind(), error = %e, "lexical index unavailable");
                    degraded.push(Degradation::LexicalUnavailable { reason: e.to_string() });
                }
            }
        }
        info!(
            provider = %self.provider(),
            table = self.backend.table_name(),
            loaded = exists,
            lexical = ?self.lexical_mode,
            "vector store ready"
        );
        Ok(Outcome::with(exists, degraded))
    }

    /// Auto-heals an uninitialized store; degradations from that are returned.
    async fn ensure_ready(&self) -> Result<Vec<Degradation>> {
        let mut lifecycle = self.lifecycle.lock().await;
        match lifecycle.state {
            LifecycleState::Ready => Ok(Vec::new()),
            LifecycleState::Closed => Err(Error::closed("vector store")),
            LifecycleState::Uninitialized | LifecycleState::Initializing => {
                debug!(provider = %self.provider(), "auto-initializing vector store");
                Ok(self.open(&mut lifecycle).await?.degraded)
            }
        }
    }

    async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let vector = self
            .embedder
            .embed_query(query)
            .await
            .map_err(|e| translate(self.provider(), "embed query", e.into()))?;
        self.check_dimension(&vector)?;
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = self
            .embedder
            .embed_batch(texts)
            .await
            .map_err(|e| translate(self.provider(), "embed documents", e.into()))?;
        if vectors.len() != texts.len() {
            let e = EmbeddingError::Failed(format!("{} vectors returned for {} texts", vectors.len(), texts.len()));
            return Err(translate(self.provider(), "embed documents", e.into()));
        }
        for v in &vectors {
            self.check_dimension(v)?;
        }
        Ok(vectors)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        let expected = self.embedder.dimension();
        if vector.len() == expected {
            return Ok(());
        }
        let e = EmbeddingError::DimensionMismatch { expected, actual: vector.len() };
        Err(translate(self.provider(), "embed", e.into()))
    }

    pub async fn add_documents(&self, docs: &[IndexedDocument], ids: Option<&[DocumentId]>) -> Result<Outcome<Vec<DocumentId>>> {
        let mut degraded = self.ensure_ready().await?;
        let ids = assign_ids(docs, ids)?;
        if docs.is_empty() {
            return Ok(Outcome::with(ids, degraded));
        }

        let docs: Vec<IndexedDocument> = docs
            .iter()
            .cloned()
            .map(|mut d| {
                self.backend.normalize(&mut d);
                d
            })
            .collect();

        let caps = self.backend.capabilities();
        let batch = self.config.batch.effective(caps.max_batch).unwrap_or(docs.len()).max(1);
        let delay = Duration::from_millis(self.config.batch.delay_ms);
        let batches = docs.len().div_ceil(batch);
        for (n, (chunk, chunk_ids)) in docs.chunks(batch).zip(ids.chunks(batch)).enumerate() {
            let texts: Vec<String> = chunk.iter().map(|d| d.content.clone()).collect();
            let vectors = self.embed_batch(&texts).await?;
            let records: Vec<VectorRecord> = chunk
                .iter()
                .zip(chunk_ids)
                .zip(vectors)
                .map(|((d, id), vector)| VectorRecord {
                    id: id.clone(),
                    content: d.content.clone(),
                    metadata: d.metadata.clone(),
                    vector,
                })
                .collect();
            self.backend.insert(&records).await.map_err(self.backend_error("add documents"))?;
            debug!(provider = %self.provider(), batch = n + 1, of = batches, size = records.len(), "batch written");
            if n + 1 < batches && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        if !caps.auto_persist {
            self.backend.flush().await.map_err(self.backend_error("save"))?;
        }
        if let Some(engine) = self.owned_lexical() {
            let mirrored = match engine.add_documents(&docs, Some(&ids)).await {
                Ok(_) => engine.save().await,
                Err(e) => Err(e),
            };
            if let Err(e) = mirrored {
                warn!(provider = %self.provider(), error = %e, "lexical mirror failed; vector write kept");
                degraded.push(Degradation::LexicalMirrorFailed { reason: e.to_string() });
            }
        }
        info!(provider = %self.provider(), added = ids.len(), batches, "documents added");
        Ok(Outcome::with(ids, degraded))
    }

    pub async fn add_texts(
        &self,
        texts: &[String],
        metadatas: Option<&[Metadata]>,
        ids: Option<&[DocumentId]>,
    ) -> Result<Outcome<Vec<DocumentId>>> {
        let docs = documents_from_texts(texts, metadatas)?;
        self.add_documents(&docs, ids).await
    }

    async fn query_vector(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Outcome<Vec<SimilarityResult>>> {
        let mut degraded = Vec::new();
        let client_side = filter.is_some() && !self.backend.capabilities().metadata_filter;
        let mut hits = if client_side {
            degraded.push(Degradation::ClientSideFilter { provider: self.provider() });
            let mut hits = self
                .backend
                .query(vector, top_k.saturating_mul(OVERFETCH), None)
                .await
                .map_err(self.backend_error("search"))?;
            filter_in_place(&mut hits, filter);
            hits
        } else {
            self.backend.query(vector, top_k, filter).await.map_err(self.backend_error("search"))?
        };
        sort_desc(&mut hits);
        hits.truncate(top_k);
        Ok(Outcome::with(hits, degraded))
    }

    async fn embed_and_query(
        &self,
        query: &str,
        embedded: Option<Vec<f32>>,
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Outcome<Vec<SimilarityResult>>> {
        let vector = match embedded {
            Some(v) => v,
            None => self.embed_query(query).await?,
        };
        self.query_vector(&vector, top_k, filter).await
    }

    /// Nearest neighbours of `query`, best first.
    ///
    /// When `min_score` removes every hit and the store allows it, the raw
    /// top-k comes back with score 0 and a `ScoreThresholdRelaxed` marker.
    pub async fn search(&self, query: &str, options: &SearchOptions) -> Result<Outcome<Vec<SimilarityResult>>> {
        let mut degraded = self.ensure_ready().await?;
        if options.top_k == 0 {
            return Ok(Outcome::with(Vec::new(), degraded));
        }
        let vector = self.embed_query(query).await?;
        let filter = options.filter.as_ref().filter(|f| !f.is_empty());
        let Outcome { value: mut hits, degraded: more } = self.query_vector(&vector, options.top_k, filter).await?;
        degraded.extend(more);

        if let Some(min_score) = options.min_score {
            let passing: Vec<SimilarityResult> = hits.iter().filter(|h| h.score >= min_score).cloned().collect();
            if passing.is_empty() && !hits.is_empty() && self.config.min_score_fallback {
                warn!(provider = %self.provider(), min_score, "no hit reached min score; returning unfiltered top-k");
                for h in &mut hits {
                    h.score = 0.0;
                }
                degraded.push(Degradation::ScoreThresholdRelaxed { min_score, returned: hits.len() });
            } else {
                hits = passing;
            }
        }
        debug!(provider = %self.provider(), hits = hits.len(), "vector search");
        Ok(Outcome::with(hits, degraded))
    }

    fn require_lexical(&self, op: &str) -> Result<()> {
        if self.supports_full_text_search() {
            Ok(())
        } else {
            Err(Error::capability(self.provider(), op))
        }
    }

    async fn lexical_hits(&self, query: &str, top_k: usize, filter: Option<&Filter>) -> Result<Outcome<Vec<LexicalResult>>> {
        if let (LexicalMode::Engine(_), Some(engine)) = (self.lexical_mode, self.owned_lexical()) {
            return Ok(Outcome::ok(engine.search(query, top_k, filter).await?));
        }
        let native = self
            .backend
            .as_native_lexical()
            .filter(|_| self.lexical_mode == LexicalMode::Native)
            .ok_or_else(|| Error::capability(self.provider(), "full-text search"))?;
        let mut degraded = Vec::new();
        let client_side = filter.is_some() && !self.backend.capabilities().metadata_filter;
        let mut hits = if client_side {
            degraded.push(Degradation::ClientSideFilter { provider: self.provider() });
            let mut hits = native
                .full_text_search(query, top_k.saturating_mul(OVERFETCH), None)
                .await
                .map_err(self.backend_error("full-text search"))?;
            filter_in_place(&mut hits, filter);
            hits
        } else {
            native.full_text_search(query, top_k, filter).await.map_err(self.backend_error("full-text search"))?
        };
        sort_desc(&mut hits);
        hits.truncate(top_k);
        Ok(Outcome::with(hits, degraded))
    }

    /// Keyword search through the backend or the owned lexical index.
    /// Fails with `Capability` before any I/O when neither exists.
    pub async fn full_text_search(&self, query: &str, options: &SearchOptions) -> Result<Outcome<Vec<LexicalResult>>> {
        self.require_lexical("full-text search")?;
        let mut degraded = self.ensure_ready().await?;
        self.require_lexical("full-text search")?;
        if options.top_k == 0 {
            return Ok(Outcome::with(Vec::new(), degraded));
        }
        let filter = options.filter.as_ref().filter(|f| !f.is_empty());
        let Outcome { value: hits, degraded: more } = self.lexical_hits(query, options.top_k, filter).await?;
        degraded.extend(more);
        debug!(provider = %self.provider(), hits = hits.len(), "full-text search");
        Ok(Outcome::with(hits, degraded))
    }

    /// Vector and keyword search dispatched concurrently, then fused.
    pub async fn hybrid_search(&self, query: &str, options: &HybridOptions) -> Result<Outcome<Vec<FusedResult>>> {
        self.require_lexical("hybrid search")?;
        let mut degraded = self.ensure_ready().await?;
        self.require_lexical("hybrid search")?;
        let top_k = options.top_k;
        if top_k == 0 {
            return Ok(Outcome::with(Vec::new(), degraded));
        }
        let alpha = options.clamped_alpha();
        let filter = options.filter.as_ref().filter(|f| !f.is_empty());

        let mut embedded = None;
        if let Some(native) = self.backend.as_native_hybrid().filter(|_| self.lexical_mode == LexicalMode::Native) {
            let vector = self.embed_query(query).await?;
            let client_side = filter.is_some() && !self.backend.capabilities().metadata_filter;
            let fetch = if client_side { top_k.saturating_mul(OVERFETCH) } else { top_k };
            match native.hybrid_query(query, &vector, alpha, fetch, filter).await {
                Ok(mut hits) => {
                    if client_side {
                        degraded.push(Degradation::ClientSideFilter { provider: self.provider() });
                        filter_in_place(&mut hits, filter);
                    }
                    sort_desc(&mut hits);
                    hits.truncate(top_k);
                    debug!(provider = %self.provider(), hits = hits.len(), "native hybrid search");
                    return Ok(Outcome::with(hits, degraded));
                }
                Err(e) => {
                    let e = translate(self.provider(), "hybrid search", e);
                    warn!(provider = %self.provider(), error = %e, "native hybrid query failed; fusing manually");
                    degraded.push(Degradation::NativeHybridFallback { reason: e.to_string() });
                    embedded = Some(vector);
                }
            }
        }

        let (vector_hits, lexical_hits) = tokio::join!(
            self.embed_and_query(query, embedded, top_k, filter),
            self.lexical_hits(query, top_k, filter)
        );
        let vector_hits = vector_hits?;
        let lexical_hits = lexical_hits?;
        for d in vector_hits.degraded.iter().chain(&lexical_hits.degraded) {
            if !degraded.contains(d) {
                degraded.push(d.clone());
            }
        }

        let fused = match options.fusion {
            FusionStrategy::Linear => fuse(&vector_hits, &lexical_hits, alpha, top_k),
            FusionStrategy::Rrf => fuse_reciprocal_rank(&vector_hits, &lexical_hits, alpha, top_k),
        };
        debug!(
            provider = %self.provider(),
            vector = vector_hits.len(),
            lexical = lexical_hits.len(),
            fused = fused.len(),
            alpha,
            "hybrid search"
        );
        Ok(Outcome::with(fused, degraded))
    }

    /// Removes by `document_id` when given, otherwise by `ids`. Returns the
    /// number of vector records removed.
    pub async fn delete(&self, ids: &[DocumentId], document_id: Option<&str>) -> Result<usize> {
        self.ensure_ready().await?;
        let selector = DeleteSelector::resolve(ids, document_id);
        if selector.is_empty() {
            return Ok(0);
        }
        let removed = self.backend.delete(&selector).await.map_err(self.backend_error("delete"))?;
        if !self.backend.capabilities().auto_persist {
            self.backend.flush().await.map_err(self.backend_error("save"))?;
        }
        if let Some(engine) = self.owned_lexical() {
            engine.delete(&selector).await?;
            engine.save().await?;
        }
        info!(provider = %self.provider(), removed, "documents deleted");
        Ok(removed)
    }

    async fn persist(&self) -> Result<()> {
        self.backend.flush().await.map_err(self.backend_error("save"))?;
        if let Some(engine) = self.owned_lexical() {
            engine.save().await?;
        }
        Ok(())
    }

    /// Flushes a buffering backend and the owned lexical index.
    pub async fn save(&self) -> Result<()> {
        self.ensure_ready().await?;
        self.persist().await
    }

    pub async fn get_stats(&self) -> Result<StoreStats> {
        if self.state().await == LifecycleState::Closed {
            return Err(Error::closed("vector store"));
        }
        let exists = self.backend.exists().await.map_err(self.backend_error("stats"))?;
        let document_count = if exists {
            match self.backend.count().await {
                Ok(n) => n,
                Err(e) => {
                    debug!(provider = %self.provider(), error = %e, "document count unavailable");
                    None
                }
            }
        } else {
            None
        };
        let lexical_engine = match self.lexical_mode {
            LexicalMode::Native => Some("native".to_string()),
            LexicalMode::Engine(kind) => Some(kind.to_string()),
            LexicalMode::None => None,
        };
        Ok(StoreStats {
            provider: self.provider(),
            persist_path: self.backend.persist_location(),
            table_name: Some(self.backend.table_name().to_string()),
            exists,
            supports_full_text_search: self.supports_full_text_search(),
            lexical_engine,
            document_count,
        })
    }

    /// Releases backend handles and the owned lexical index. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state == LifecycleState::Closed {
            return Ok(());
        }
        let was_ready = lifecycle.state == LifecycleState::Ready;
        lifecycle.state = LifecycleState::Closed;

        let mut first_error = None;
        if was_ready && !self.backend.capabilities().auto_persist {
            if let Err(e) = self.backend.flush().await {
                first_error.get_or_insert(translate(self.provider(), "save", e));
            }
        }
        if let Some(engine) = &self.lexical {
            if let Err(e) = engine.close().await {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.backend.close().await {
            first_error.get_or_insert(translate(self.provider(), "close", e));
        }
        info!(provider = %self.provider(), "vector store closed");
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragstore_core::config::{BackendConfig, MemoryConfig};
    use ragstore_core::embed::HashEmbedder;
    use ragstore_core::ErrorKind;
    use ragstore_vector::backends::MemoryBackend;

    fn memory_store() -> VectorStore {
        let config = StoreConfig::new("unit", BackendConfig::Memory(MemoryConfig { path: None }));
        VectorStore::new(config, Box::new(MemoryBackend::new("unit", None)), Arc::new(HashEmbedder::new(32)))
    }

    #[tokio::test]
    async fn capability_error_precedes_initialization() {
        let store = memory_store();
        let err = store.full_text_search("cats", &SearchOptions::default()).await.expect_err("no lexical");
        assert_eq!(err.kind(), ErrorKind::Capability);
        assert_eq!(store.state().await, LifecycleState::Uninitialized);
    }

    #[tokio::test]
    async fn initialize_twice_is_a_noop() {
        let store = memory_store();
        assert!(!store.initialize().await.expect("first").value);
        assert!(!store.initialize().await.expect("second").value);
        assert_eq!(store.state().await, LifecycleState::Ready);
    }

    #[tokio::test]
    async fn zero_top_k_returns_nothing() {
        let store = memory_store();
        store.add_texts(&["a".to_string()], None, None).await.expect("add");
        let hits = store.search("a", &SearchOptions::top_k(0)).await.expect("search");
        assert!(hits.is_empty());
    }
}
