//! Client for the backing REST data API.
//!
//! Every request carries the privileged service credential; callers never
//! see it, and their own credential is never forwarded.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::UpstreamConfig;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Request headers a caller may pass through to the data API.
///
/// `Accept-Encoding` is not forwarded: the client negotiates gzip with
/// the data API itself and decodes the body, because every proxied body is
/// re-enveloped before it goes back to the caller.
pub const FORWARDED_REQUEST_HEADERS: [HeaderName; 4] = [
    header::ACCEPT,
    header::ACCEPT_LANGUAGE,
    header::CACHE_CONTROL,
    HeaderName::from_static("prefer"),
];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid upstream configuration: {0}")]
    Config(String),
}

/// Identity of the original caller, attached for upstream auditing.
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub request_id: Option<String>,
    pub source_ip: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    /// Path below the REST prefix, e.g. `clients` or `rpc/get_stats`.
    pub path: String,
    /// Pre-encoded query string without the leading `?`.
    pub query: String,
    pub body: Option<Value>,
    pub headers: HeaderMap,
    pub caller: CallerContext,
}

impl UpstreamRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: String::new(),
            body: None,
            headers: HeaderMap::new(),
            caller: CallerContext::default(),
        }
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Set `Prefer` unless the caller already supplied one.
    pub fn prefer_default(mut self, value: &'static str) -> Self {
        let prefer = HeaderName::from_static("prefer");
        if !self.headers.contains_key(&prefer) {
            self.headers.insert(prefer, HeaderValue::from_static(value));
        }
        self
    }

    pub fn caller(mut self, caller: CallerContext) -> Self {
        self.caller = caller;
        self
    }
}

#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        if self.body.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&self.body)
    }

    /// Total from a `Content-Range: 0-9/42` (or `*/42`) header.
    pub fn content_range_total(&self) -> Option<u64> {
        self.headers
            .get(header::CONTENT_RANGE)?
            .to_str()
            .ok()?
            .rsplit('/')
            .next()?
            .parse()
            .ok()
    }
}

/// The REST data API as seen by the proxy.
#[async_trait]
pub trait DataApi: Send + Sync {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError>;
}

/// `DataApi` over HTTP with the service-role credential and a fixed timeout.
pub struct RestClient {
    client: reqwest::Client,
    base_url: url::Url,
    rest_prefix: String,
    service_key: String,
    timeout: Duration,
}

impl RestClient {
    pub fn new(client: reqwest::Client, config: &UpstreamConfig) -> Result<Self, UpstreamError> {
        let base_url = url::Url::parse(&config.base_url)
            .map_err(|e| UpstreamError::Config(format!("invalid base URL '{}': {}", config.base_url, e)))?;
        if config.service_key.is_empty() {
            tracing::warn!("SUPABASE_SERVICE_ROLE_KEY is empty; upstream calls will be anonymous");
        }
        Ok(Self {
            client,
            base_url,
            rest_prefix: config.rest_prefix.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }

    fn url_for(&self, request: &UpstreamRequest) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        if request.query.is_empty() {
            format!("{}{}/{}", base, self.rest_prefix, request.path)
        } else {
            format!("{}{}/{}?{}", base, self.rest_prefix, request.path, request.query)
        }
    }
}

#[async_trait]
impl DataApi for RestClient {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.url_for(&request);
        tracing::debug!("Upstream {} {}", request.method, url);

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .timeout(self.timeout)
            .headers(request.headers.clone())
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key);

        let caller = &request.caller;
        for (name, value) in [
            (USER_ID_HEADER, &caller.user_id),
            (USER_EMAIL_HEADER, &caller.email),
            (crate::middleware::request_id::REQUEST_ID_HEADER, &caller.request_id),
            (FORWARDED_FOR_HEADER, &caller.source_ip),
        ] {
            if let Some(value) = value {
                builder = builder.header(name, value);
            }
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(self.timeout)
            } else {
                UpstreamError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                UpstreamError::Timeout(self.timeout)
            } else {
                UpstreamError::Network(e.to_string())
            }
        })?;

        tracing::debug!("Upstream responded {} ({} bytes)", status, body.len());
        Ok(UpstreamResponse { status, headers, body })
    }
}
