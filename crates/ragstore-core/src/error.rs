//! Error taxonomy shared by every backend and engine.
//!
//! Adapters work in `anyhow` internally; everything that crosses the public
//! API passes through [`translate`], which sorts the failure into a fixed
//! [`ErrorKind`] and writes a backend-aware message. The original error is
//! kept as `source()` for diagnostics.

use std::fmt;
use thiserror::Error;

use crate::types::Provider;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Operator-facing failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConnectionRefused,
    Authentication,
    NotFound,
    Timeout,
    EmbeddingConfig,
    /// The backend/engine combination cannot perform the operation at all.
    Capability,
    InvalidConfig,
    Closed,
    Operation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::Authentication => "authentication",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::EmbeddingConfig => "embedding_config",
            ErrorKind::Capability => "capability",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::Closed => "closed",
            ErrorKind::Operation => "operation",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    provider: Option<Provider>,
    message: String,
    #[source]
    source: Option<BoxError>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, provider: None, message: message.into(), source: None }
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn provider(&self) -> Option<Provider> {
        self.provider
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn capability(provider: Provider, operation: &str) -> Self {
        Self::new(
            ErrorKind::Capability,
            format!(
                "{} does not support {operation}: the backend has no native full-text search and no lexical engine is configured. \
                 Set a lexical engine (tantivy, bm25 or inverted) for this store to enable it.",
                provider.display_name()
            ),
        )
        .with_provider(provider)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, format!("Invalid configuration: {}", message.into()))
    }

    pub fn closed(what: &str) -> Self {
        Self::new(ErrorKind::Closed, format!("{what} has been closed"))
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, format!("Not found: {}", message.into()))
    }

    pub fn operation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Operation, format!("Operation failed: {}", message.into()))
    }

    /// Classified failure raised directly by an adapter (e.g. from an HTTP status).
    pub fn backend(provider: Provider, kind: ErrorKind, operation: &str, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        Self::new(kind, describe(provider, operation, kind, &detail)).with_provider(provider)
    }
}

/// Failure of the injected embedding capability.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Failed(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid embedding input: {0}")]
    InvalidInput(String),
}

/// Sort any backend failure into the taxonomy.
pub fn translate(provider: Provider, operation: &str, err: anyhow::Error) -> Error {
    let err = match err.downcast::<Error>() {
        Ok(already) => return already,
        Err(other) => other,
    };
    let kind = classify(&err);
    let detail = root_message(&err);
    Error::new(kind, describe(provider, operation, kind, &detail))
        .with_provider(provider)
        .with_source(err)
}

/// Classification without a provider, for lexical engines and local I/O.
pub fn translate_local(operation: &str, err: anyhow::Error) -> Error {
    let err = match err.downcast::<Error>() {
        Ok(already) => return already,
        Err(other) => other,
    };
    let kind = classify(&err);
    let message = format!("{operation} failed: {}", root_message(&err));
    Error::new(kind, message).with_source(err)
}

pub fn classify(err: &anyhow::Error) -> ErrorKind {
    for cause in err.chain() {
        if cause.downcast_ref::<EmbeddingError>().is_some() {
            return ErrorKind::EmbeddingConfig;
        }
        if cause.downcast_ref::<tokio::time::error::Elapsed>().is_some() {
            return ErrorKind::Timeout;
        }
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::NotConnected => return ErrorKind::ConnectionRefused,
                std::io::ErrorKind::TimedOut => return ErrorKind::Timeout,
                std::io::ErrorKind::NotFound => return ErrorKind::NotFound,
                std::io::ErrorKind::PermissionDenied => return ErrorKind::Authentication,
                _ => {}
            }
        }
        if let Some(e) = cause.downcast_ref::<Error>() {
            return e.kind();
        }
    }
    let text = err.chain().map(|c| c.to_string().to_lowercase()).collect::<Vec<_>>().join(" | ");
    classify_message(&text)
}

const EMBEDDING_PATTERNS: &[&str] = &["embedding", "embedder", "dimension mismatch"];
const TIMEOUT_PATTERNS: &[&str] = &["timed out", "timeout", "deadline exceeded", "etimedout"];
const CONNECTION_PATTERNS: &[&str] = &[
    "connection refused",
    "econnrefused",
    "failed to connect",
    "error trying to connect",
    "dns error",
    "no route to host",
    "network is unreachable",
    "enotfound",
    "unreachable",
];
const AUTH_PATTERNS: &[&str] = &[
    "401",
    "403",
    "unauthorized",
    "unauthenticated",
    "forbidden",
    "invalid api key",
    "api key",
    "authentication",
    "permission denied",
];
const NOT_FOUND_PATTERNS: &[&str] = &["404", "not found", "does not exist", "doesn't exist", "no such"];

/// Pattern match on a lowercased message. Order matters: a timed-out
/// connection is a timeout, and an embedding provider's 401 is an embedding
/// misconfiguration rather than a vector-store credential problem.
pub fn classify_message(text: &str) -> ErrorKind {
    let has = |patterns: &[&str]| patterns.iter().any(|p| text.contains(p));
    if has(EMBEDDING_PATTERNS) {
        ErrorKind::EmbeddingConfig
    } else if has(TIMEOUT_PATTERNS) {
        ErrorKind::Timeout
    } else if has(CONNECTION_PATTERNS) {
        ErrorKind::ConnectionRefused
    } else if has(AUTH_PATTERNS) {
        ErrorKind::Authentication
    } else if has(NOT_FOUND_PATTERNS) {
        ErrorKind::NotFound
    } else {
        ErrorKind::Operation
    }
}

fn root_message(err: &anyhow::Error) -> String {
    err.chain().last().map(|c| c.to_string()).unwrap_or_else(|| err.to_string())
}

fn describe(provider: Provider, operation: &str, kind: ErrorKind, detail: &str) -> String {
    let name = provider.display_name();
    match kind {
        ErrorKind::ConnectionRefused => match provider.default_port() {
            Some(port) => format!(
                "Cannot connect to {name} during {operation}. Make sure the server is running and reachable \
                 (a local instance listens on localhost:{port} by default). Cause: {detail}"
            ),
            None if provider == Provider::Pinecone => format!(
                "Cannot reach the Pinecone index host during {operation}. Check the index host URL shown in the \
                 Pinecone console. Cause: {detail}"
            ),
            None => format!(
                "Cannot open the {name} storage location during {operation}. Check that the path exists and is \
                 writable. Cause: {detail}"
            ),
        },
        ErrorKind::Authentication => format!(
            "{name} rejected the credentials during {operation}. {}",
            credential_hint(provider)
        ),
        ErrorKind::NotFound => format!(
            "{name} could not find the requested collection or index during {operation}. It may have been \
             deleted or never created; re-run initialization. Cause: {detail}"
        ),
        ErrorKind::Timeout => format!(
            "{name} did not respond in time during {operation}. Check network connectivity and server load. \
             Cause: {detail}"
        ),
        ErrorKind::EmbeddingConfig => format!(
            "Embedding failed during {operation} on {name}. Check the embedding provider's credentials and that \
             its vector dimension matches the collection. Cause: {detail}"
        ),
        ErrorKind::Capability => format!("{name} does not support {operation}"),
        ErrorKind::InvalidConfig => format!("Invalid {name} configuration: {detail}"),
        ErrorKind::Closed => format!("The {name} store has been closed; {operation} is not possible"),
        ErrorKind::Operation => format!("{name} {operation} failed: {detail}"),
    }
}

fn credential_hint(provider: Provider) -> &'static str {
    match provider {
        Provider::Pinecone => "Check the API key under API Keys in the Pinecone console (app.pinecone.io).",
        Provider::Qdrant => "Check the API key in the Qdrant Cloud dashboard, or remove it for a local instance.",
        Provider::Weaviate => "Check the API key in the Weaviate Cloud console, or remove it for anonymous access.",
        Provider::Milvus => "Check the token (user:password, or a Zilliz Cloud API key).",
        Provider::Elasticsearch => "Check the API key or username/password configured for the cluster.",
        Provider::Chroma => "Check the Chroma auth token configured on the server.",
        Provider::Memory | Provider::LanceDb | Provider::Sqlite => {
            "Check filesystem permissions on the storage path."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_patterns_pick_categories() {
        assert_eq!(classify_message("connect econnrefused 127.0.0.1:6333"), ErrorKind::ConnectionRefused);
        assert_eq!(classify_message("http status 401 unauthorized"), ErrorKind::Authentication);
        assert_eq!(classify_message("collection docs not found"), ErrorKind::NotFound);
        assert_eq!(classify_message("operation timed out"), ErrorKind::Timeout);
        assert_eq!(classify_message("embedding api returned 401"), ErrorKind::EmbeddingConfig);
        assert_eq!(classify_message("something odd happened"), ErrorKind::Operation);
    }

    #[test]
    fn translate_keeps_cause_and_names_port() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = translate(Provider::Qdrant, "search", anyhow::Error::new(io));
        assert_eq!(err.kind(), ErrorKind::ConnectionRefused);
        assert!(err.message().contains("localhost:6333"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn translate_passes_through_translated_errors() {
        let original = Error::capability(Provider::Qdrant, "full-text search");
        let err = translate(Provider::Chroma, "search", anyhow::Error::new(original));
        assert_eq!(err.kind(), ErrorKind::Capability);
        assert_eq!(err.provider(), Some(Provider::Qdrant));
    }

    #[test]
    fn embedding_error_in_chain_wins() {
        let err = anyhow::Error::new(EmbeddingError::Failed("401 from provider".into())).context("add documents");
        assert_eq!(classify(&err), ErrorKind::EmbeddingConfig);
    }
}
