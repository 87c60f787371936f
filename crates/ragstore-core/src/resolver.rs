use tracing::warn;

use crate::config::{LexicalEngineKind, LexicalPreference};
use crate::types::Provider;

/// Engine used when `native` is requested on a backend that has none.
pub const DEFAULT_LEXICAL_ENGINE: LexicalEngineKind = LexicalEngineKind::Tantivy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexicalMode {
    /// The backend scores keywords itself.
    Native,
    /// An auxiliary engine owned by the store.
    Engine(LexicalEngineKind),
    /// No keyword search; lexical and hybrid calls fail with a capability error.
    None,
}

impl LexicalMode {
    pub fn engine(self) -> Option<LexicalEngineKind> {
        match self {
            LexicalMode::Engine(kind) => Some(kind),
            LexicalMode::Native | LexicalMode::None => None,
        }
    }

    pub fn is_available(self) -> bool {
        !matches!(self, LexicalMode::None)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLexical {
    pub mode: LexicalMode,
    pub warning: Option<String>,
}

/// Decide which keyword engine backs `provider`. Never fails.
pub fn resolve_lexical(provider: Provider, preference: Option<LexicalPreference>) -> ResolvedLexical {
    let resolved = match (preference, provider.has_native_lexical()) {
        (Some(LexicalPreference::Engine(kind)), _) => ResolvedLexical { mode: LexicalMode::Engine(kind), warning: None },
        (Some(LexicalPreference::Native) | None, true) => ResolvedLexical { mode: LexicalMode::Native, warning: None },
        (Some(LexicalPreference::Native), false) => ResolvedLexical {
            mode: LexicalMode::Engine(DEFAULT_LEXICAL_ENGINE),
            warning: Some(format!(
                "{provider} has no native full-text search; using the {DEFAULT_LEXICAL_ENGINE} engine instead"
            )),
        },
        (None, false) => ResolvedLexical { mode: LexicalMode::None, warning: None },
    };
    if let Some(w) = &resolved.warning {
        warn!(%provider, "{w}");
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_backends_default_to_native() {
        for p in [Provider::Sqlite, Provider::Weaviate, Provider::Elasticsearch] {
            assert_eq!(resolve_lexical(p, None).mode, LexicalMode::Native);
        }
    }

    #[test]
    fn native_request_on_plain_backend_falls_back_with_warning() {
        let r = resolve_lexical(Provider::Qdrant, Some(LexicalPreference::Native));
        assert_eq!(r.mode, LexicalMode::Engine(DEFAULT_LEXICAL_ENGINE));
        assert!(r.warning.is_some());
    }

    #[test]
    fn explicit_engine_always_wins() {
        let r = resolve_lexical(Provider::Elasticsearch, Some(LexicalPreference::Engine(LexicalEngineKind::Bm25)));
        assert_eq!(r.mode, LexicalMode::Engine(LexicalEngineKind::Bm25));
    }

    #[test]
    fn nothing_requested_on_plain_backend_is_none() {
        for p in [Provider::Memory, Provider::LanceDb, Provider::Qdrant, Provider::Chroma, Provider::Pinecone, Provider::Milvus] {
            assert_eq!(resolve_lexical(p, None).mode, LexicalMode::None);
        }
    }
}
