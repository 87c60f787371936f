//! Vector backend adapters.
//!
//! Every adapter implements [`ragstore_core::traits::VectorBackend`] and
//! reports failures through `anyhow`; the store translates them. Network
//! adapters share [`http::RestClient`], embedded ones talk to their engine
//! directly.

pub mod backends;
pub mod http;

use anyhow::Result;
use std::path::Path;
use tracing::debug;

use ragstore_core::config::{resolve_with_base, BackendConfig};
use ragstore_core::traits::VectorBackend;

use backends::*;

/// Builds the adapter for `config`; `data_dir` anchors relative embedded paths.
pub fn connect(config: &BackendConfig, table: &str, data_dir: &Path) -> Result<Box<dyn VectorBackend>> {
    let timeout = config.timeout();
    let local = |p: &Path| resolve_with_base(data_dir, p.to_string_lossy());
    let backend: Box<dyn VectorBackend> = match config {
        BackendConfig::Memory(c) => Box::new(MemoryBackend::new(table, c.path.as_deref().map(local))),
        BackendConfig::LanceDb(c) => {
            let uri = if c.uri.contains("://") { c.uri.clone() } else { local(Path::new(&c.uri)).display().to_string() };
            Box::new(LanceDbBackend::new(uri, table))
        }
        BackendConfig::Sqlite(c) => Box::new(SqliteBackend::new(local(&c.path), table)),
        BackendConfig::Qdrant(c) => Box::new(QdrantBackend::new(c, table, timeout)?),
        BackendConfig::Chroma(c) => Box::new(ChromaBackend::new(c, table, timeout)?),
        BackendConfig::Pinecone(c) => Box::new(PineconeBackend::new(c, table, timeout)?),
        BackendConfig::Weaviate(c) => Box::new(WeaviateBackend::new(c, table, timeout)?),
        BackendConfig::Milvus(c) => Box::new(MilvusBackend::new(c, table, timeout)?),
        BackendConfig::Elasticsearch(c) => Box::new(ElasticsearchBackend::new(c, table, timeout)?),
    };
    debug!(provider = %backend.provider(), table = backend.table_name(), location = %backend.persist_location(), "backend built");
    Ok(backend)
}
