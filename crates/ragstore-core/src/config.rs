use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::types::Provider;

pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_BATCH_DELAY_MS: u64 = 100;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            other => figment = figment.merge(Toml::file(format!("config.{other}.toml"))),
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self {
        Self { figment }
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::invalid_config(format!("failed to read '{key}': {e}")))
    }

    /// The `[store]` section, validated.
    pub fn store(&self) -> Result<StoreConfig> {
        let store: StoreConfig = self.get("store")?;
        store.validate()?;
        Ok(store)
    }
}

/// Expand a user-provided path string:
/// - leading '~' becomes the home directory
/// - ${VAR} and $VAR are substituted from the environment
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Absolute paths are returned as-is; relative ones are joined onto `base`.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}

/// Same as [`expand_path`] for an already-typed path.
pub fn expand_config_path(p: &Path) -> PathBuf {
    match p.to_str() {
        Some(s) => expand_path(s),
        None => p.to_path_buf(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// JSON snapshot written on save; pure in-process when absent.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LanceDbConfig {
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QdrantConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChromaConfig {
    pub url: String,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PineconeConfig {
    /// Data-plane host of the index, e.g. `https://docs-abc123.svc.us-east1.pinecone.io`.
    pub index_host: String,
    pub api_key: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WeaviateConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MilvusConfig {
    pub url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElasticsearchConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Connection settings, one shape per backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum BackendConfig {
    Memory(MemoryConfig),
    #[serde(rename = "lancedb")]
    LanceDb(LanceDbConfig),
    Sqlite(SqliteConfig),
    Qdrant(QdrantConfig),
    Chroma(ChromaConfig),
    Pinecone(PineconeConfig),
    Weaviate(WeaviateConfig),
    Milvus(MilvusConfig),
    Elasticsearch(ElasticsearchConfig),
}

impl BackendConfig {
    pub fn provider(&self) -> Provider {
        match self {
            BackendConfig::Memory(_) => Provider::Memory,
            BackendConfig::LanceDb(_) => Provider::LanceDb,
            BackendConfig::Sqlite(_) => Provider::Sqlite,
            BackendConfig::Qdrant(_) => Provider::Qdrant,
            BackendConfig::Chroma(_) => Provider::Chroma,
            BackendConfig::Pinecone(_) => Provider::Pinecone,
            BackendConfig::Weaviate(_) => Provider::Weaviate,
            BackendConfig::Milvus(_) => Provider::Milvus,
            BackendConfig::Elasticsearch(_) => Provider::Elasticsearch,
        }
    }

    /// Request timeout for network backends.
    pub fn timeout(&self) -> Duration {
        let secs = match self {
            BackendConfig::Qdrant(c) => c.timeout_secs,
            BackendConfig::Chroma(c) => c.timeout_secs,
            BackendConfig::Pinecone(c) => c.timeout_secs,
            BackendConfig::Weaviate(c) => c.timeout_secs,
            BackendConfig::Milvus(c) => c.timeout_secs,
            BackendConfig::Elasticsearch(c) => c.timeout_secs,
            BackendConfig::Memory(_) | BackendConfig::LanceDb(_) | BackendConfig::Sqlite(_) => None,
        };
        Duration::from_secs(secs.unwrap_or(DEFAULT_NETWORK_TIMEOUT_SECS))
    }

    pub fn validate(&self) -> Result<()> {
        let provider = self.provider();
        match self {
            BackendConfig::Memory(_) => Ok(()),
            BackendConfig::LanceDb(c) => require(provider, "uri", &c.uri),
            BackendConfig::Sqlite(c) => {
                if c.path.as_os_str().is_empty() {
                    return Err(missing(provider, "path"));
                }
                Ok(())
            }
            BackendConfig::Qdrant(c) => require_url(provider, &c.url),
            BackendConfig::Chroma(c) => require_url(provider, &c.url),
            BackendConfig::Pinecone(c) => {
                require_url(provider, &c.index_host)?;
                require(provider, "api_key", &c.api_key)
            }
            BackendConfig::Weaviate(c) => require_url(provider, &c.url),
            BackendConfig::Milvus(c) => require_url(provider, &c.url),
            BackendConfig::Elasticsearch(c) => {
                require_url(provider, &c.url)?;
                if c.username.is_some() != c.password.is_some() {
                    return Err(Error::invalid_config(
                        "elasticsearch: username and password must be given together",
                    ));
                }
                Ok(())
            }
        }
    }
}

fn missing(provider: Provider, field: &str) -> Error {
    Error::invalid_config(format!("{provider}: '{field}' is required")).with_provider(provider)
}

fn require(provider: Provider, field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() { Err(missing(provider, field)) } else { Ok(()) }
}

fn require_url(provider: Provider, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(missing(provider, "url"));
    }
    url::Url::parse(value).map_err(|e| {
        Error::invalid_config(format!("{provider}: '{value}' is not a valid URL: {e}")).with_provider(provider)
    })?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LexicalEngineKind {
    Tantivy,
    Bm25,
    Inverted,
}

impl LexicalEngineKind {
    pub const ALL: [LexicalEngineKind; 3] =
        [LexicalEngineKind::Tantivy, LexicalEngineKind::Bm25, LexicalEngineKind::Inverted];

    pub fn as_str(self) -> &'static str {
        match self {
            LexicalEngineKind::Tantivy => "tantivy",
            LexicalEngineKind::Bm25 => "bm25",
            LexicalEngineKind::Inverted => "inverted",
        }
    }
}

impl fmt::Display for LexicalEngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LexicalEngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        LexicalEngineKind::ALL
            .into_iter()
            .find(|k| k.as_str() == lower)
            .ok_or_else(|| Error::invalid_config(format!("unknown lexical engine '{s}'")))
    }
}

/// What the caller asked for; the resolver decides what actually runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LexicalPreference {
    Native,
    Engine(LexicalEngineKind),
}

impl fmt::Display for LexicalPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexicalPreference::Native => f.write_str("native"),
            LexicalPreference::Engine(kind) => kind.fmt(f),
        }
    }
}

impl FromStr for LexicalPreference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("native") {
            Ok(LexicalPreference::Native)
        } else {
            s.parse().map(LexicalPreference::Engine)
        }
    }
}

impl TryFrom<String> for LexicalPreference {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<LexicalPreference> for String {
    fn from(p: LexicalPreference) -> String {
        p.to_string()
    }
}

/// Tuning knobs; each engine reads the ones it supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LexicalSettings {
    pub fuzzy: bool,
    pub prefix: bool,
    pub phonetic: bool,
    /// Multiplier applied when a document contains the query verbatim.
    pub boost_exact: f32,
    pub stop_words: bool,
    /// Never touch the filesystem.
    pub in_memory: bool,
}

impl Default for LexicalSettings {
    fn default() -> Self {
        Self { fuzzy: true, prefix: true, phonetic: false, boost_exact: 1.5, stop_words: true, in_memory: false }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchSettings {
    pub size: Option<usize>,
    pub delay_ms: u64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self { size: None, delay_ms: DEFAULT_BATCH_DELAY_MS }
    }
}

impl BatchSettings {
    /// Effective batch size given the backend's own limit; `None` means one batch.
    pub fn effective(&self, backend_max: Option<usize>) -> Option<usize> {
        match (self.size, backend_max) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, b) => b,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    pub backend: BackendConfig,
    pub project_id: String,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default = "default_base_data_dir")]
    pub base_data_dir: PathBuf,
    #[serde(default)]
    pub lexical: Option<LexicalPreference>,
    #[serde(default)]
    pub lexical_settings: LexicalSettings,
    #[serde(default)]
    pub batch: BatchSettings,
    #[serde(default = "default_true")]
    pub min_score_fallback: bool,
}

fn default_base_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_true() -> bool {
    true
}

impl StoreConfig {
    pub fn new(project_id: impl Into<String>, backend: BackendConfig) -> Self {
        Self {
            backend,
            project_id: project_id.into(),
            table_name: None,
            base_data_dir: default_base_data_dir(),
            lexical: None,
            lexical_settings: LexicalSettings::default(),
            batch: BatchSettings::default(),
            min_score_fallback: true,
        }
    }

    pub fn with_table_name(mut self, name: impl Into<String>) -> Self {
        self.table_name = Some(name.into());
        self
    }

    pub fn with_base_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_data_dir = dir.into();
        self
    }

    pub fn with_lexical(mut self, pref: LexicalPreference) -> Self {
        self.lexical = Some(pref);
        self
    }

    pub fn with_lexical_settings(mut self, settings: LexicalSettings) -> Self {
        self.lexical_settings = settings;
        self
    }

    pub fn with_batch(mut self, batch: BatchSettings) -> Self {
        self.batch = batch;
        self
    }

    pub fn provider(&self) -> Provider {
        self.backend.provider()
    }

    /// Table/collection/index name; defaults to the project id.
    pub fn table_name(&self) -> &str {
        self.table_name.as_deref().unwrap_or(&self.project_id)
    }

    pub fn data_dir(&self) -> PathBuf {
        expand_config_path(&self.base_data_dir)
    }

    pub fn validate(&self) -> Result<()> {
        if self.project_id.trim().is_empty() {
            return Err(Error::invalid_config("project_id must not be empty"));
        }
        if matches!(&self.table_name, Some(t) if t.trim().is_empty()) {
            return Err(Error::invalid_config("table_name must not be empty when given"));
        }
        if self.batch.size == Some(0) {
            return Err(Error::invalid_config("batch.size must be greater than zero"));
        }
        self.backend.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn misspelled_backend_key_is_rejected() {
        let raw = serde_json::json!({"provider": "qdrant", "url": "http://localhost:6333", "apikey": "x"});
        let err = serde_json::from_value::<BackendConfig>(raw).expect_err("unknown field");
        assert!(err.to_string().contains("apikey"), "{err}");
    }

    #[test]
    fn lexical_preference_names() {
        assert_eq!("native".parse::<LexicalPreference>().expect("native"), LexicalPreference::Native);
        assert_eq!(
            "BM25".parse::<LexicalPreference>().expect("bm25"),
            LexicalPreference::Engine(LexicalEngineKind::Bm25)
        );
        assert!("lucene".parse::<LexicalPreference>().is_err());
    }

    #[test]
    fn batch_size_takes_smaller_limit() {
        let b = BatchSettings { size: Some(40), delay_ms: 0 };
        assert_eq!(b.effective(Some(100)), Some(40));
        assert_eq!(BatchSettings::default().effective(Some(100)), Some(100));
        assert_eq!(BatchSettings::default().effective(None), None);
    }
}
