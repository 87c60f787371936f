use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ragstore_core::config::{
    ChromaConfig, ElasticsearchConfig, MilvusConfig, PineconeConfig, QdrantConfig, WeaviateConfig,
};
use ragstore_core::error::translate;
use ragstore_core::traits::VectorBackend;
use ragstore_core::types::{DeleteSelector, Filter, Provider, VectorRecord};
use ragstore_core::ErrorKind;
use ragstore_vector::backends::{
    ChromaBackend, ElasticsearchBackend, MilvusBackend, PineconeBackend, QdrantBackend, WeaviateBackend,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn record(id: &str) -> VectorRecord {
    VectorRecord {
        id: id.into(),
        content: format!("chunk {id}"),
        metadata: json!({"id": id, "document_id": "doc"}).as_object().cloned().unwrap_or_default(),
        vector: vec![0.1, 0.2],
    }
}

fn qdrant(server: &MockServer, api_key: Option<&str>) -> QdrantBackend {
    let config = QdrantConfig { url: server.uri(), api_key: api_key.map(str::to_string), timeout_secs: None };
    QdrantBackend::new(&config, "docs", TIMEOUT).expect("qdrant")
}

#[tokio::test]
async fn qdrant_search_sends_filter_and_key() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/collections/docs/points/search"))
        .and(header("api-key", "secret"))
        .and(body_partial_json(json!({
            "limit": 2,
            "filter": {"must": [{"key": "metadata.lang", "match": {"value": "en"}}]}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": [
                {"id": "3b241101-e2bb-4255-8caf-4136c566a962", "score": 0.91, "payload": {"chunk_id": "a", "content": "alpha", "metadata": {"lang": "en"}}}
            ]
        })))
        .mount(&server)
        .await;

    let backend = qdrant(&server, Some("secret"));
    let hits = backend.query(&[0.1, 0.2], 2, Some(&Filter::new().equals("lang", "en"))).await.expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id.as_deref(), Some("a"));
    assert_eq!(hits[0].content, "alpha");
    assert!((hits[0].score - 0.91).abs() < 1e-6);
}

#[tokio::test]
async fn qdrant_missing_collection_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/collections/docs"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"status": {"error": "Not found"}})))
        .mount(&server)
        .await;
    assert!(!qdrant(&server, None).exists().await.expect("probe"));
}

#[tokio::test]
async fn unreachable_server_is_connection_refused() {
    // nothing listens on port 1
    let config = QdrantConfig { url: "http://127.0.0.1:1".into(), api_key: None, timeout_secs: None };
    let backend = QdrantBackend::new(&config, "docs", TIMEOUT).expect("qdrant");
    let err = backend.ping().await.expect_err("refused");
    let err = translate(Provider::Qdrant, "ping", err);
    assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
    assert!(err.message().contains("localhost:6333"), "{}", err.message());
}

#[tokio::test]
async fn pinecone_rejected_key_points_at_console() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/describe_index_stats"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid API Key"))
        .mount(&server)
        .await;
    let config = PineconeConfig { index_host: server.uri(), api_key: "bad".into(), namespace: None, timeout_secs: None };
    let backend = PineconeBackend::new(&config, "docs", TIMEOUT).expect("pinecone");
    let err = translate(Provider::Pinecone, "ping", backend.ping().await.expect_err("401"));
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(err.provider(), Some(Provider::Pinecone));
    assert!(err.message().contains("Pinecone console"), "{}", err.message());
}

#[tokio::test]
async fn pinecone_query_moves_text_out_of_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/query"))
        .and(header("Api-Key", "k"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "matches": [{"id": "a", "score": 0.8, "metadata": {"text": "alpha", "lang": "en"}}]
        })))
        .mount(&server)
        .await;
    let config = PineconeConfig { index_host: server.uri(), api_key: "k".into(), namespace: Some("ns".into()), timeout_secs: None };
    let hits = PineconeBackend::new(&config, "docs", TIMEOUT).expect("pinecone").query(&[0.1], 1, None).await.expect("query");
    assert_eq!(hits[0].content, "alpha");
    assert!(!hits[0].metadata.contains_key("text"));
    assert_eq!(hits[0].metadata.get("lang"), Some(&json!("en")));
}

#[tokio::test]
async fn chroma_scores_are_one_minus_distance() {
    let server = MockServer::start().await;
    let base = "/api/v2/tenants/default_tenant/databases/default_database/collections";
    Mock::given(method("GET"))
        .and(path(format!("{base}/docs")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "c-1", "name": "docs"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{base}/c-1/query")))
        .and(body_partial_json(json!({"n_results": 2, "where": {"lang": {"$eq": "en"}}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ids": [["a", "b"]],
            "documents": [["alpha", "beta"]],
            "metadatas": [[{"lang": "en"}, {"lang": "en"}]],
            "distances": [[0.1, 0.4]]
        })))
        .mount(&server)
        .await;

    let config = ChromaConfig { url: server.uri(), tenant: None, database: None, auth_token: None, timeout_secs: None };
    let backend = ChromaBackend::new(&config, "docs", TIMEOUT).expect("chroma");
    backend.load().await.expect("load");
    let hits = backend.query(&[0.1], 2, Some(&Filter::new().equals("lang", "en"))).await.expect("query");
    assert_eq!(hits.iter().map(|h| h.id.clone().unwrap_or_default()).collect::<Vec<_>>(), vec!["a", "b"]);
    assert!((hits[0].score - 0.9).abs() < 1e-6);
    assert!((hits[1].score - 0.6).abs() < 1e-6);
}

#[tokio::test]
async fn weaviate_graphql_errors_surface() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": [{"message": "Cannot query field \"Docs\" on type \"GetObjectsObj\""}]
        })))
        .mount(&server)
        .await;
    let config = WeaviateConfig { url: server.uri(), api_key: None, timeout_secs: None };
    let backend = WeaviateBackend::new(&config, "docs", TIMEOUT).expect("weaviate");
    let err = translate(Provider::Weaviate, "search", backend.query(&[0.1], 3, None).await.expect_err("graphql error"));
    assert_eq!(err.kind(), ErrorKind::Operation);
    assert!(err.message().contains("Cannot query field"));
}

#[tokio::test]
async fn weaviate_bm25_scores_parse_from_strings() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"Get": {"Docs": [
                {"content": "alpha", "metadata_json": "{\"lang\":\"en\"}", "chunk_id": "a", "_additional": {"score": "1.25"}}
            ]}}
        })))
        .mount(&server)
        .await;
    let config = WeaviateConfig { url: server.uri(), api_key: None, timeout_secs: None };
    let backend = WeaviateBackend::new(&config, "docs", TIMEOUT).expect("weaviate");
    let lexical = backend.as_native_lexical().expect("native lexical");
    let hits = lexical.full_text_search("alpha", 3, None).await.expect("bm25");
    assert_eq!(hits[0].id.as_deref(), Some("a"));
    assert!((hits[0].score - 1.25).abs() < 1e-6);
    assert_eq!(hits[0].metadata.get("lang"), Some(&json!("en")));
}

#[tokio::test]
async fn milvus_nonzero_code_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/collections/has"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 1800, "message": "user hasn't authenticated"})))
        .mount(&server)
        .await;
    let config = MilvusConfig { url: server.uri(), token: None, database: None, timeout_secs: None };
    let backend = MilvusBackend::new(&config, "docs", TIMEOUT).expect("milvus");
    let err = translate(Provider::Milvus, "initialize", backend.exists().await.expect_err("code 1800"));
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn milvus_delete_by_document_counts_matches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/query"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": [{"count(*)": 3}]})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v2/vectordb/entities/delete"))
        .and(body_partial_json(json!({"collectionName": "docs"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "data": {}})))
        .expect(1)
        .mount(&server)
        .await;
    let config = MilvusConfig { url: server.uri(), token: None, database: None, timeout_secs: None };
    let backend = MilvusBackend::new(&config, "docs", TIMEOUT).expect("milvus");
    assert_eq!(backend.delete(&DeleteSelector::Document("doc".into())).await.expect("delete"), 3);
}

#[tokio::test]
async fn elasticsearch_bulk_errors_fail_the_insert() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(header("content-type", "application/x-ndjson"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "errors": true,
            "items": [{"index": {"status": 400, "error": {"reason": "mapper_parsing_exception"}}}]
        })))
        .mount(&server)
        .await;
    let config = ElasticsearchConfig {
        url: server.uri(),
        api_key: Some("k".into()),
        username: None,
        password: None,
        timeout_secs: None,
    };
    let backend = ElasticsearchBackend::new(&config, "docs", TIMEOUT).expect("es");
    let err = translate(Provider::Elasticsearch, "add documents", backend.insert(&[record("a")]).await.expect_err("bulk"));
    assert_eq!(err.kind(), ErrorKind::Operation);
    assert!(err.message().contains("mapper_parsing_exception"));
}

#[tokio::test]
async fn elasticsearch_knn_scores_map_back_to_cosine() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/docs/_search"))
        .and(header("authorization", "ApiKey k"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "hits": {"hits": [{"_id": "a", "_score": 0.95, "_source": {"content": "alpha", "metadata": {}}}]}
        })))
        .mount(&server)
        .await;
    let config = ElasticsearchConfig {
        url: server.uri(),
        api_key: Some("k".into()),
        username: None,
        password: None,
        timeout_secs: None,
    };
    let backend = ElasticsearchBackend::new(&config, "docs", TIMEOUT).expect("es");
    let hits = backend.query(&[0.1], 1, None).await.expect("knn");
    assert!((hits[0].score - 0.9).abs() < 1e-5);
}
