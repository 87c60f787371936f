use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use ragstore_core::config::{BackendConfig, StoreConfig};
use ragstore_core::error::{translate, Error, ErrorKind, Result};
use ragstore_core::traits::{Embedder, VectorBackend};
use ragstore_core::types::Provider;

use crate::store::VectorStore;

/// Upper bound for a credential probe.
pub const VALIDATION_TIMEOUT: Duration = Duration::from_secs(10);

pub fn list_available_backends() -> Vec<Provider> {
    Provider::ALL.to_vec()
}

/// Validates `config` and builds its adapter without touching the backend.
pub fn build_backend(config: &StoreConfig) -> Result<Box<dyn VectorBackend>> {
    config.validate()?;
    ragstore_vector::connect(&config.backend, config.table_name(), &config.data_dir())
        .map_err(|e| translate(config.provider(), "connect", e))
}

/// Builds and initializes a store; the returned store is `Ready`.
pub async fn create_vector_store(config: StoreConfig, embedder: Arc<dyn Embedder>) -> Result<VectorStore> {
    let backend = build_backend(&config)?;
    let store = VectorStore::new(config, backend, embedder);
    let outcome = store.initialize().await?;
    for d in &outcome.degraded {
        warn!(provider = %store.provider(), "{d}");
    }
    info!(
        provider = %store.provider(),
        loaded = outcome.value,
        full_text = store.supports_full_text_search(),
        "store created"
    );
    Ok(store)
}

/// Connectivity and credential probe. Creates no collection.
///
/// Embedded backends have nothing to authenticate against, so only their
/// configuration is checked.
pub async fn validate_store_credentials(config: &BackendConfig) -> Result<()> {
    config.validate()?;
    let provider = config.provider();
    if provider.is_embedded() {
        debug!(%provider, "embedded backend, configuration checked only");
        return Ok(());
    }
    let backend = ragstore_vector::connect(config, "ragstore", Path::new("."))
        .map_err(|e| translate(provider, "validate credentials", e))?;
    match tokio::time::timeout(VALIDATION_TIMEOUT, backend.ping()).await {
        Ok(Ok(())) => {
            info!(%provider, "credentials valid");
            Ok(())
        }
        Ok(Err(e)) => Err(translate(provider, "validate credentials", e)),
        Err(_) => Err(Error::backend(
            provider,
            ErrorKind::Timeout,
            "validate credentials",
            format!("no response within {}s", VALIDATION_TIMEOUT.as_secs()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragstore_core::config::{MemoryConfig, QdrantConfig};

    #[test]
    fn every_provider_is_listed() {
        let all = list_available_backends();
        assert_eq!(all.len(), 9);
        assert!(all.contains(&Provider::Elasticsearch));
    }

    #[test]
    fn invalid_config_fails_before_connecting() {
        let config = StoreConfig::new(" ", BackendConfig::Memory(MemoryConfig { path: None }));
        let err = build_backend(&config).err().expect("empty project id");
        assert_eq!(err.kind(), ErrorKind::InvalidConfig);
    }

    #[tokio::test]
    async fn unreachable_backend_is_connection_refused() {
        let config = BackendConfig::Qdrant(QdrantConfig {
            url: "http://127.0.0.1:1".into(),
            api_key: None,
            timeout_secs: Some(2),
        });
        let err = validate_store_credentials(&config).await.expect_err("nothing listens on port 1");
        assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
        assert_eq!(err.provider(), Some(Provider::Qdrant));
    }
}
