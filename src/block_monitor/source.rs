//! Block height sources
//!
//! Every source answers one question: what is the current chain height? Sources
//! are polled concurrently by the monitor and never retried within a tick.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::config::{HttpMethod, SourceConfig, SourceKind};
use crate::errors::ConfigError;
use crate::types::BlockSnapshot;

/// Why a source produced no snapshot this tick
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Timeout after {timeout_ms}ms (source: {source_id})")]
    Timeout { source_id: String, timeout_ms: u64 },

    #[error("Source unreachable: {message} (source: {source_id})")]
    Unreachable { source_id: String, message: String },

    #[error("Malformed response: {message} (source: {source_id})")]
    MalformedResponse { source_id: String, message: String },
}

impl SourceError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Unreachable { .. } => "unreachable",
            Self::MalformedResponse { .. } => "malformed",
        }
    }
}

/// A single block-height provider
#[async_trait]
pub trait BlockSource: Send + Sync {
    fn id(&self) -> &str;

    /// Upper bound the monitor enforces on `fetch`
    fn timeout(&self) -> Duration;

    async fn fetch(&self) -> Result<BlockSnapshot, SourceError>;
}

/// Explorer-style HTTP API; the height is read through a JSON pointer
#[derive(Debug, Clone)]
pub struct HttpJsonSource {
    id: String,
    url: String,
    method: HttpMethod,
    headers: HeaderMap,
    body: Option<Value>,
    height_pointer: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpJsonSource {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        height_pointer: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            method: HttpMethod::Get,
            headers: HeaderMap::new(),
            body: None,
            height_pointer: height_pointer.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, ConfigError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ConfigError::validation(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ConfigError::validation(format!("invalid header value for '{}': {}", name, e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn from_config(config: &SourceConfig, default_timeout_ms: u64) -> Result<Self, ConfigError> {
        let pointer = config.height_pointer.clone().ok_or_else(|| {
            ConfigError::validation(format!("source '{}' requires height_pointer", config.name))
        })?;
        let mut source = Self::new(
            config.name.clone(),
            config.url.clone(),
            pointer,
            config.timeout(default_timeout_ms),
        )
        .with_method(config.method);
        if let Some(body) = &config.body {
            source = source.with_body(body.clone());
        }
        for (name, value) in &config.headers {
            source = source.with_header(name, value)?;
        }
        Ok(source)
    }
}

#[async_trait]
impl BlockSource for HttpJsonSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self) -> Result<BlockSnapshot, SourceError> {
        let request = match self.method {
            HttpMethod::Get => self.client.get(&self.url),
            HttpMethod::Post => self
                .client
                .post(&self.url)
                .json(self.body.as_ref().unwrap_or(&json!({}))),
        };
        let request = request.headers(self.headers.clone()).timeout(self.timeout);
        fetch_height(&self.id, request, &self.height_pointer, self.timeout).await
    }
}

/// Substrate node queried with JSON-RPC `chain_getHeader`
#[derive(Debug, Clone)]
pub struct SubstrateRpcSource {
    id: String,
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl SubstrateRpcSource {
    pub fn new(id: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl BlockSource for SubstrateRpcSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn fetch(&self) -> Result<BlockSnapshot, SourceError> {
        let request = self
            .client
            .post(&self.url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "chain_getHeader",
                "params": [],
            }))
            .timeout(self.timeout);
        fetch_height(&self.id, request, "/result/number", self.timeout).await
    }
}

/// Build a source from its configuration entry
pub fn build_source(
    config: &SourceConfig,
    default_timeout_ms: u64,
) -> Result<Arc<dyn BlockSource>, ConfigError> {
    match config.kind {
        SourceKind::HttpJson => Ok(Arc::new(HttpJsonSource::from_config(
            config,
            default_timeout_ms,
        )?)),
        SourceKind::SubstrateRpc => Ok(Arc::new(SubstrateRpcSource::new(
            config.name.clone(),
            config.url.clone(),
            config.timeout(default_timeout_ms),
        ))),
    }
}

async fn fetch_height(
    source_id: &str,
    request: reqwest::RequestBuilder,
    pointer: &str,
    timeout: Duration,
) -> Result<BlockSnapshot, SourceError> {
    let started = Instant::now();

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            SourceError::Timeout {
                source_id: source_id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else {
            SourceError::Unreachable {
                source_id: source_id.to_string(),
                message: e.to_string(),
            }
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(SourceError::MalformedResponse {
            source_id: source_id.to_string(),
            message: format!("HTTP status {}", status),
        });
    }

    let body: Value = response.json().await.map_err(|e| {
        if e.is_timeout() {
            SourceError::Timeout {
                source_id: source_id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else {
            SourceError::MalformedResponse {
                source_id: source_id.to_string(),
                message: format!("invalid JSON body: {}", e),
            }
        }
    })?;

    let field = body.pointer(pointer).ok_or_else(|| SourceError::MalformedResponse {
        source_id: source_id.to_string(),
        message: format!("missing field {}", pointer),
    })?;

    let height = parse_height(field).ok_or_else(|| SourceError::MalformedResponse {
        source_id: source_id.to_string(),
        message: format!("unparsable height {}", field),
    })?;

    Ok(BlockSnapshot::new(height, source_id, started.elapsed()))
}

/// Accepts JSON numbers, decimal strings and `0x` hex strings
pub fn parse_height(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => s.parse().ok(),
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_height_formats() {
        assert_eq!(parse_height(&json!(4_512_345)), Some(4_512_345));
        assert_eq!(parse_height(&json!("4512345")), Some(4_512_345));
        assert_eq!(parse_height(&json!("0x44dbd9")), Some(0x44dbd9));
        assert_eq!(parse_height(&json!(-1)), None);
        assert_eq!(parse_height(&json!("block")), None);
        assert_eq!(parse_height(&json!(null)), None);
    }

    #[test]
    fn test_build_source_requires_pointer() {
        let config = SourceConfig {
            name: "explorer".into(),
            url: "http://localhost".into(),
            kind: SourceKind::HttpJson,
            height_pointer: None,
            method: HttpMethod::Get,
            headers: Default::default(),
            body: None,
            timeout_ms: None,
        };
        assert!(build_source(&config, 1_000).is_err());
    }

    #[test]
    fn test_build_source_timeout_override() {
        let config = SourceConfig {
            name: "node".into(),
            url: "http://localhost:9944".into(),
            kind: SourceKind::SubstrateRpc,
            height_pointer: None,
            method: HttpMethod::Post,
            headers: Default::default(),
            body: None,
            timeout_ms: Some(750),
        };
        let source = build_source(&config, 10_000).unwrap();
        assert_eq!(source.id(), "node");
        assert_eq!(source.timeout(), Duration::from_millis(750));
    }

    #[test]
    fn test_invalid_header_rejected() {
        let source = HttpJsonSource::new("x", "http://localhost", "/h", Duration::from_secs(1));
        assert!(source.with_header("bad header", "v").is_err());
    }
}
