use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;

use ragstore_core::config::{
    BackendConfig, LexicalEngineKind, LexicalPreference, MemoryConfig, SqliteConfig, StoreConfig,
};
use ragstore_core::error::EmbeddingError;
use ragstore_core::traits::Embedder;
use ragstore_core::types::{HybridOptions, IndexedDocument, Metadata, Provider, SearchOptions};
use ragstore_hybrid::create_vector_store;

/// Axis 0 is "feline", axis 1 is "canine", axis 2 collects everything else.
struct KeywordEmbedder;

impl KeywordEmbedder {
    fn embed(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; 3];
        for word in text.to_lowercase().split_whitespace() {
            match word {
                "cats" | "cat" | "feline" => v[0] += 1.0,
                "dogs" | "dog" | "canine" => v[1] += 1.0,
                _ => v[2] += 0.25,
            }
        }
        v
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn dimension(&self) -> usize {
        3
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(Self::embed(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| Self::embed(t)).collect())
    }
}

fn pets() -> Vec<IndexedDocument> {
    let doc = |content: &str, id: &str| {
        let metadata: Metadata = json!({ "id": id }).as_object().cloned().unwrap_or_default();
        IndexedDocument::with_metadata(content, metadata)
    };
    vec![doc("cats are great", "a"), doc("dogs are loyal", "b"), doc("cats and dogs coexist", "c")]
}

fn rank(ids: &[String], id: &str) -> usize {
    ids.iter().position(|x| x == id).unwrap_or(usize::MAX)
}

async fn check_pet_scenario(config: StoreConfig) {
    let store = create_vector_store(config, Arc::new(KeywordEmbedder)).await.expect("store");
    let ids = store.add_documents(&pets(), None).await.expect("add").into_inner();
    assert_eq!(ids, vec!["a", "b", "c"]);

    let lexical = store.full_text_search("cats", &SearchOptions::top_k(3)).await.expect("lexical");
    let lexical: Vec<String> = lexical.iter().filter_map(|h| h.id.clone()).collect();
    assert!(rank(&lexical, "a") < rank(&lexical, "b"), "{lexical:?}");
    assert!(rank(&lexical, "c") < rank(&lexical, "b"), "{lexical:?}");

    let vector = store.search("feline pets", &SearchOptions::top_k(3)).await.expect("vector");
    assert!(vector.windows(2).all(|w| w[0].score >= w[1].score));
    let vector: Vec<String> = vector.iter().filter_map(|h| h.id.clone()).collect();
    assert!(rank(&vector, "a") < rank(&vector, "b"), "{vector:?}");
    assert!(rank(&vector, "c") < rank(&vector, "b"), "{vector:?}");

    let fused = store.hybrid_search("cats", &HybridOptions::new(0.5, 3)).await.expect("hybrid");
    let fused_ids: Vec<String> = fused.iter().filter_map(|h| h.id.clone()).collect();
    assert!(rank(&fused_ids, "a") <= rank(&fused_ids, "b"), "{fused_ids:?}");
    assert!(rank(&fused_ids, "c") <= rank(&fused_ids, "b"), "{fused_ids:?}");

    store.close().await.expect("close");
}

#[tokio::test]
async fn pets_on_memory_with_tantivy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StoreConfig::new("pets", BackendConfig::Memory(MemoryConfig { path: None }))
        .with_base_data_dir(dir.path())
        .with_lexical(LexicalPreference::Engine(LexicalEngineKind::Tantivy));
    check_pet_scenario(config).await;
    assert!(dir.path().join("tantivy").join("pets").exists(), "lexical index persisted under the engine directory");
}

#[tokio::test]
async fn pets_on_sqlite_with_native_fts() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StoreConfig::new("pets", BackendConfig::Sqlite(SqliteConfig { path: "pets.db".into() }))
        .with_base_data_dir(dir.path());
    check_pet_scenario(config).await;
    assert!(dir.path().join("pets.db").exists(), "relative path resolved against the data dir");
}

#[tokio::test]
async fn native_preference_without_native_support_falls_back_to_an_engine() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StoreConfig::new("pets", BackendConfig::Memory(MemoryConfig { path: None }))
        .with_base_data_dir(dir.path())
        .with_lexical(LexicalPreference::Native);
    let store = create_vector_store(config, Arc::new(KeywordEmbedder)).await.expect("store");
    let stats = store.get_stats().await.expect("stats");
    assert_eq!(stats.provider, Provider::Memory);
    assert!(stats.supports_full_text_search);
    assert_eq!(stats.lexical_engine.as_deref(), Some("tantivy"));
}

#[tokio::test]
async fn memory_snapshot_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = StoreConfig::new("notes", BackendConfig::Memory(MemoryConfig { path: Some("notes.json".into()) }))
        .with_base_data_dir(dir.path())
        .with_lexical(LexicalPreference::Engine(LexicalEngineKind::Bm25));

    let first = create_vector_store(config.clone(), Arc::new(KeywordEmbedder)).await.expect("store");
    first.add_documents(&pets(), None).await.expect("add");
    first.close().await.expect("close");

    let second = create_vector_store(config, Arc::new(KeywordEmbedder)).await.expect("reopen");
    assert!(second.initialize().await.expect("init").value, "existing collection loaded");
    let hits = second.full_text_search("dogs", &SearchOptions::top_k(3)).await.expect("lexical");
    assert!(hits.iter().any(|h| h.id.as_deref() == Some("b")));
    let stats = second.get_stats().await.expect("stats");
    assert_eq!(stats.document_count, Some(3));
}
