//! Shared REST plumbing for the network adapters.

use anyhow::Context;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use ragstore_core::error::{classify_message, Error, ErrorKind};
use ragstore_core::types::Provider;

/// How a backend expects credentials on every request.
#[derive(Debug, Clone, Default)]
pub enum Auth {
    #[default]
    None,
    Bearer(String),
    Header(&'static str, String),
    Basic { username: String, password: String },
}

/// One base URL plus a timeout-bounded `reqwest` client.
#[derive(Debug, Clone)]
pub struct RestClient {
    provider: Provider,
    base: String,
    auth: Auth,
    extra_headers: Vec<(&'static str, String)>,
    client: reqwest::Client,
}

impl RestClient {
    pub fn new(provider: Provider, base_url: &str, timeout: Duration, auth: Auth) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .build()
            .context("building HTTP client")?;
        Ok(Self { provider, base: base_url.trim_end_matches('/').to_string(), auth, extra_headers: Vec::new(), client })
    }

    pub fn with_header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.extra_headers.push((name, value.into()));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    fn build(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, self.endpoint(path));
        req = match &self.auth {
            Auth::None => req,
            Auth::Bearer(token) => req.bearer_auth(token),
            Auth::Header(name, value) => req.header(*name, value),
            Auth::Basic { username, password } => req.basic_auth(username, Some(password)),
        };
        for (name, value) in &self.extra_headers {
            req = req.header(*name, value);
        }
        req
    }

    /// JSON request; non-2xx statuses become classified errors.
    pub async fn json(&self, op: &str, method: Method, path: &str, body: Option<&Value>) -> anyhow::Result<Value> {
        let mut req = self.build(method.clone(), path);
        if let Some(body) = body {
            req = req.json(body);
        }
        self.execute(op, &method, path, req).await
    }

    /// Raw body request (e.g. NDJSON) with an explicit content type.
    pub async fn raw(&self, op: &str, method: Method, path: &str, content_type: &str, body: String) -> anyhow::Result<Value> {
        let req = self.build(method.clone(), path).header(reqwest::header::CONTENT_TYPE, content_type).body(body);
        self.execute(op, &method, path, req).await
    }

    /// `true` on 2xx, `false` on 404, error otherwise.
    pub async fn probe(&self, op: &str, method: Method, path: &str, body: Option<&Value>) -> anyhow::Result<bool> {
        let mut req = self.build(method, path);
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(|e| self.transport(op, e))?;
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if status.is_success() {
            return Ok(true);
        }
        let text = resp.text().await.unwrap_or_default();
        Err(self.status_error(op, status, &text).into())
    }

    async fn execute(&self, op: &str, method: &Method, path: &str, req: reqwest::RequestBuilder) -> anyhow::Result<Value> {
        debug!(provider = %self.provider, %method, path, op, "request");
        let resp = req.send().await.map_err(|e| self.transport(op, e))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| self.transport(op, e))?;
        if !status.is_success() {
            return Err(self.status_error(op, status, &text).into());
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).with_context(|| format!("{} {op}: response is not JSON", self.provider))
    }

    fn transport(&self, op: &str, err: reqwest::Error) -> anyhow::Error {
        let kind = if err.is_timeout() {
            ErrorKind::Timeout
        } else if err.is_connect() {
            ErrorKind::ConnectionRefused
        } else {
            classify_message(&err.to_string().to_lowercase())
        };
        let detail = err.to_string();
        Error::backend(self.provider, kind, op, detail).with_source(err).into()
    }

    pub fn status_error(&self, op: &str, status: StatusCode, body: &str) -> Error {
        let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body, 300));
        Error::backend(self.provider, status_kind(status, body), op, detail)
    }
}

/// Category for a non-2xx status.
pub fn status_kind(status: StatusCode, body: &str) -> ErrorKind {
    match status.as_u16() {
        401 | 403 => ErrorKind::Authentication,
        404 => ErrorKind::NotFound,
        408 | 504 => ErrorKind::Timeout,
        _ => match classify_message(&body.to_lowercase()) {
            // body text mentioning an embedding is still the backend's failure here
            ErrorKind::EmbeddingConfig => ErrorKind::Operation,
            kind => kind,
        },
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Stable point id for backends that only accept UUIDs.
pub fn point_uuid(id: &str) -> String {
    match uuid::Uuid::parse_str(id) {
        Ok(u) => u.to_string(),
        Err(_) => uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, id.as_bytes()).to_string(),
    }
}

/// Reads a JSON number that some APIs send as a string.
pub fn as_score(v: Option<&Value>) -> Option<f32> {
    match v? {
        Value::Number(n) => n.as_f64().map(|f| f as f32),
        Value::String(s) => s.parse::<f32>().ok(),
        _ => None,
    }
}

pub fn metadata_of(v: Option<&Value>) -> ragstore_core::types::Metadata {
    match v {
        Some(Value::Object(m)) => m.clone(),
        Some(Value::String(s)) => serde_json::from_str(s).unwrap_or_default(),
        _ => Default::default(),
    }
}
