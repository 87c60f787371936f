//! One adapter per supported vector database.

pub mod chroma;
pub mod elasticsearch;
pub mod lancedb;
pub mod memory;
pub mod milvus;
pub mod pinecone;
pub mod qdrant;
pub mod sqlite;
pub mod weaviate;

pub use chroma::ChromaBackend;
pub use elasticsearch::ElasticsearchBackend;
pub use lancedb::LanceDbBackend;
pub use memory::MemoryBackend;
pub use milvus::MilvusBackend;
pub use pinecone::PineconeBackend;
pub use qdrant::QdrantBackend;
pub use sqlite::SqliteBackend;
pub use weaviate::WeaviateBackend;

/// Largest write batch the network adapters send in one request.
pub const NETWORK_BATCH: usize = 100;
