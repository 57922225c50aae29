//! Unit-test doubles for the data API.

use async_trait::async_trait;
use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::auth::{AuthError, GoogleVerifier, JwksCache, KeyFetcher};
use crate::services::ProviderService;
use crate::upstream::{DataApi, UpstreamError, UpstreamRequest, UpstreamResponse};

pub const TEST_KID: &str = "test-key-1";
pub const GOOGLE_CLIENT_ID: &str = "test-client.apps.googleusercontent.com";

/// Records every request and replays queued responses in order.
/// An empty queue answers `200 []`.
pub struct StubDataApi {
    requests: Mutex<Vec<UpstreamRequest>>,
    responses: Mutex<VecDeque<Result<UpstreamResponse, UpstreamError>>>,
}

impl StubDataApi {
    pub fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push_json(&self, status: StatusCode, body: Value) {
        self.push_response(status, HeaderMap::new(), body);
    }

    pub fn push_count(&self, total: u64) {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&format!("*/{}", total)) {
            headers.insert(header::CONTENT_RANGE, value);
        }
        self.push_response(StatusCode::OK, headers, Value::Null);
    }

    pub fn push_response(&self, status: StatusCode, mut headers: HeaderMap, body: Value) {
        let body = if body.is_null() {
            Bytes::new()
        } else {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
            Bytes::from(body.to_string())
        };
        self.responses.lock().unwrap().push_back(Ok(UpstreamResponse { status, headers, body }));
    }

    pub fn push_error(&self, error: UpstreamError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataApi for StubDataApi {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
        self.requests.lock().unwrap().push(request);
        self.responses.lock().unwrap().pop_front().unwrap_or_else(|| {
            Ok(UpstreamResponse {
                status: StatusCode::OK,
                headers: HeaderMap::new(),
                body: Bytes::from_static(b"[]"),
            })
        })
    }
}

/// Serves the fixture JWKS without touching the network.
pub struct StaticKeyFetcher;

#[async_trait]
impl KeyFetcher for StaticKeyFetcher {
    async fn fetch(&self) -> Result<jsonwebtoken::jwk::JwkSet, AuthError> {
        serde_json::from_str(include_str!("../../tests/fixtures/google_jwks.json"))
            .map_err(|e| AuthError::KeyFetch(e.to_string()))
    }
}

/// RS256 token signed with the fixture key, as an identity provider would issue it.
pub fn sign_google_token(claims: &Value) -> String {
    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = Some(TEST_KID.to_string());
    let key = jsonwebtoken::EncodingKey::from_rsa_pem(include_bytes!("../../tests/fixtures/google_test_key.pem")).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

/// Standard claims for a verified Google account, valid for an hour.
pub fn google_claims(email: &str) -> Value {
    let now = chrono::Utc::now().timestamp();
    serde_json::json!({
        "iss": "https://accounts.google.com",
        "aud": GOOGLE_CLIENT_ID,
        "sub": "google-sub-1",
        "email": email,
        "email_verified": true,
        "name": "Test User",
        "iat": now,
        "exp": now + 3600,
    })
}

pub fn google_verifier(api: std::sync::Arc<StubDataApi>) -> GoogleVerifier {
    let jwks = JwksCache::new(std::sync::Arc::new(StaticKeyFetcher), std::time::Duration::from_secs(3600));
    GoogleVerifier::new(
        std::sync::Arc::new(jwks),
        ProviderService::new(api, "auth_providers"),
        vec!["accounts.google.com".to_string(), "https://accounts.google.com".to_string()],
    )
}
