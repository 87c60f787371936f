use serde_json::json;

use ragstore_core::config::{LexicalEngineKind, LexicalSettings};
use ragstore_core::traits::LexicalEngine;
use ragstore_core::types::{Degradation, DeleteSelector, Filter, IndexedDocument, Metadata};
use ragstore_core::ErrorKind;
use ragstore_lexical::{LexicalLocation, LexicalStore};

fn doc(content: &str, meta: serde_json::Value) -> IndexedDocument {
    let metadata: Metadata = meta.as_object().cloned().unwrap_or_default();
    IndexedDocument::with_metadata(content, metadata)
}

fn corpus() -> Vec<IndexedDocument> {
    vec![
        doc("Cats are small domesticated felines that purr", json!({"id": "a", "document_id": "pets", "kind": "cat"})),
        doc("Dogs are loyal companions that love to play fetch", json!({"id": "b", "document_id": "pets", "kind": "dog"})),
        doc("Rust is a systems programming language", json!({"id": "c", "document_id": "code"})),
    ]
}

fn ids(results: &[ragstore_core::types::LexicalResult]) -> Vec<String> {
    results.iter().filter_map(|r| r.id.clone()).collect()
}

#[tokio::test]
async fn every_engine_satisfies_the_same_contract() {
    for kind in LexicalEngineKind::ALL {
        let store = LexicalStore::in_memory(kind, LexicalSettings::default());
        let added = store.add_documents(&corpus(), None).await.expect("add");
        assert_eq!(added, vec!["a", "b", "c"], "{kind}: ids come from metadata");

        let hits = store.search("cats purr", 3, None).await.expect("search");
        assert_eq!(hits.first().and_then(|h| h.id.as_deref()), Some("a"), "{kind}");
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score), "{kind}: sorted");
        assert_eq!(hits[0].content, corpus()[0].content, "{kind}: rehydrated from side table");

        let filtered = store
            .search("loyal companions", 3, Some(&Filter::new().equals("kind", "cat")))
            .await
            .expect("filtered");
        assert!(ids(&filtered).iter().all(|id| id == "a"), "{kind}: filter applied");

        assert_eq!(store.delete(&DeleteSelector::Ids(vec!["a".into()])).await.expect("delete"), 1);
        let after = store.search("cats purr felines", 3, None).await.expect("search");
        assert!(!ids(&after).contains(&"a".to_string()), "{kind}: deleted id never returned");

        let stats = store.get_stats().await.expect("stats");
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.engine, kind.to_string());
    }
}

#[tokio::test]
async fn document_id_delete_removes_every_chunk() {
    let store = LexicalStore::in_memory(LexicalEngineKind::Inverted, LexicalSettings::default());
    store.add_documents(&corpus(), None).await.expect("add");
    let removed = store.delete(&DeleteSelector::resolve(&["c".to_string()], Some("pets"))).await.expect("delete");
    assert_eq!(removed, 2);
    assert_eq!(store.get_stats().await.expect("stats").document_count, 1);
}

#[tokio::test]
async fn reopened_index_keeps_documents() {
    for kind in LexicalEngineKind::ALL {
        let tmp = tempfile::tempdir().expect("tempdir");
        let location = LexicalLocation::new(tmp.path(), "proj", "memory-docs");
        {
            let store = LexicalStore::new(kind, Some(location.clone()), LexicalSettings::default());
            let outcome = store.initialize().await.expect("init");
            assert!(!outcome.value, "{kind}: fresh index");
            store.add_documents(&corpus(), None).await.expect("add");
            store.close().await.expect("close saves dirty index");
        }
        let dir = tmp.path().join(kind.as_str()).join("proj");
        assert!(dir.join("memory-docs.docs.json").exists(), "{kind}: side table written");

        let store = LexicalStore::new(kind, Some(location), LexicalSettings::default());
        let outcome = store.initialize().await.expect("reopen");
        assert!(outcome.value, "{kind}: existing index loaded");
        let hits = store.search("rust programming", 2, None).await.expect("search");
        assert_eq!(hits.first().and_then(|h| h.id.as_deref()), Some("c"), "{kind}");
    }
}

#[tokio::test]
async fn unwritable_directory_degrades_to_memory() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let blocker = tmp.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").expect("write");

    let store = LexicalStore::new(
        LexicalEngineKind::Tantivy,
        Some(LexicalLocation::new(&blocker, "proj", "idx")),
        LexicalSettings::default(),
    );
    let outcome = store.initialize().await.expect("init still succeeds");
    assert!(outcome.degraded.iter().any(|d| matches!(d, Degradation::PersistenceDisabled { .. })));

    store.add_documents(&corpus(), None).await.expect("add");
    store.save().await.expect("save is a no-op");
    let stats = store.get_stats().await.expect("stats");
    assert!(!stats.persistent);
    assert_eq!(store.search("dogs", 1, None).await.expect("search").len(), 1);
}

#[tokio::test]
async fn operations_auto_initialize_and_fail_after_close() {
    let store = LexicalStore::in_memory(LexicalEngineKind::Bm25, LexicalSettings::default());
    store.add_texts(&["hello lexical world".to_string()], None, Some(&["x".to_string()])).await.expect("auto-init");
    assert_eq!(store.search("lexical", 5, None).await.expect("search").len(), 1);

    store.close().await.expect("close");
    store.close().await.expect("second close is a no-op");
    let err = store.search("lexical", 5, None).await.expect_err("closed");
    assert_eq!(err.kind(), ErrorKind::Closed);
}

#[tokio::test]
async fn clear_empties_the_index() {
    let store = LexicalStore::in_memory(LexicalEngineKind::Tantivy, LexicalSettings::default());
    store.add_documents(&corpus(), None).await.expect("add");
    store.clear().await.expect("clear");
    assert!(store.search("cats", 3, None).await.expect("search").is_empty());
}
