#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use serde_json::{json, Value};

use compliance_proxy::auth::TokenIssuer;
use compliance_proxy::config::AppConfig;
use compliance_proxy::{app, AppState};

pub const TEST_SECRET: &str = "integration-test-secret";
pub const SERVICE_KEY: &str = "test-service-role-key";
pub const GOOGLE_CLIENT_ID: &str = "test-client.apps.googleusercontent.com";
pub const OFFICER_EMAIL: &str = "officer@fsp.co.za";
pub const OFFICER_PASSWORD: &str = "correct-horse";
pub const REGISTERED_GOOGLE_EMAIL: &str = "registered@fsp.co.za";

const JWKS: &str = include_str!("../fixtures/google_jwks.json");
const SIGNING_KEY: &[u8] = include_bytes!("../fixtures/google_test_key.pem");

/// One request as the mock data API received it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl RecordedRequest {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }
}

#[derive(Clone, Default)]
pub struct MockUpstream {
    pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockUpstream {
    pub fn recorded(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests against data tables and functions, ignoring directory lookups.
    pub fn data_requests(&self) -> Vec<RecordedRequest> {
        self.recorded()
            .into_iter()
            .filter(|r| r.path.starts_with("/rest/v1/") && !r.path.ends_with("/users") && !r.path.ends_with("/auth_providers"))
            .filter(|r| !r.path.ends_with("/rpc/verify_user_credentials"))
            .collect()
    }

    pub fn clear(&self) {
        self.requests.lock().unwrap().clear();
    }
}

pub struct TestApp {
    pub base_url: String,
    pub upstream: MockUpstream,
    pub config: AppConfig,
    pub client: reqwest::Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// First-party token as issued by `/auth/login`.
    pub fn token(&self, sub: &str, email: &str, role: Option<&str>) -> String {
        TokenIssuer::new(&self.config.security)
            .issue(sub, email, None, role.map(str::to_string), "database")
            .expect("token issuing")
            .token
    }

    pub async fn post_proxy(&self, operation: &str, token: Option<&str>, body: Value) -> Result<reqwest::Response> {
        let mut request = self.client.post(self.url(&format!("/proxy/{}", operation))).json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        Ok(request.send().await?)
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.upstream.service_key = SERVICE_KEY.to_string();
    config.upstream.timeout_secs = 5;
    config.security.jwt_secret = TEST_SECRET.to_string();
    config.security.enable_database_login = true;
    config.security.exempt_functions = vec!["get_public_stats".to_string()];
    config.security.cors_origins = vec!["https://app.example.com".to_string()];
    config.api.enable_rate_limiting = false;
    config
}

/// Start the mock data API and the proxy wired to it.
pub async fn spawn_app(configure: impl FnOnce(&mut AppConfig)) -> Result<TestApp> {
    let upstream = MockUpstream::default();
    let upstream_addr = serve(
        Router::new().fallback(mock_handler).with_state(upstream.clone()),
    )
    .await?;

    let mut config = test_config();
    config.upstream.base_url = format!("http://{}", upstream_addr);
    config.oauth.google_jwks_url = format!("http://{}/oauth2/v3/certs", upstream_addr);
    configure(&mut config);

    let state = AppState::from_config(config.clone())?;
    let proxy_addr = serve(app(state)).await?;

    Ok(TestApp {
        base_url: format!("http://{}", proxy_addr),
        upstream,
        config,
        client: reqwest::Client::new(),
    })
}

async fn serve(router: Router) -> Result<SocketAddr> {
    let port = portpicker::pick_unused_port().context("failed to pick free port")?;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await;
    });
    wait_ready(addr, Duration::from_secs(5)).await?;
    Ok(addr)
}

async fn wait_ready(addr: SocketAddr, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    anyhow::bail!("server did not become ready on {} within {:?}", addr, timeout)
}

/// RS256 ID token signed with the fixture key.
pub fn google_id_token(email: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    let claims = json!({
        "iss": "https://accounts.google.com",
        "aud": GOOGLE_CLIENT_ID,
        "sub": format!("google-{}", email),
        "email": email,
        "email_verified": true,
        "name": "Google User",
        "iat": now,
        "exp": now + 3600,
    });
    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = Some("test-key-1".to_string());
    let key = jsonwebtoken::EncodingKey::from_rsa_pem(SIGNING_KEY).expect("fixture key");
    jsonwebtoken::encode(&header, &claims, &key).expect("sign")
}

/// Write a policy file for tests that need grants beyond the built-in default.
pub fn write_policy(name: &str, yaml: &str) -> Result<String> {
    let path = std::env::temp_dir().join(format!("compliance-proxy-{}-{}.yaml", name, std::process::id()));
    std::fs::write(&path, yaml)?;
    Ok(path.to_string_lossy().into_owned())
}

fn officer_row() -> Value {
    json!({"id": 7, "email": OFFICER_EMAIL, "full_name": "Compliance Officer", "role": "compliance_officer", "is_active": true})
}

fn google_row() -> Value {
    json!({"id": 8, "email": REGISTERED_GOOGLE_EMAIL, "full_name": "Registered User", "role": "viewer", "is_active": true})
}

fn json_response(status: StatusCode, body: Value) -> Response {
    (status, [("content-type", "application/json")], body.to_string()).into_response()
}

async fn mock_handler(
    State(mock): State<MockUpstream>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let query: Vec<(String, String)> = uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();
    let body_json: Option<Value> = serde_json::from_slice(&body).ok();

    let recorded = RecordedRequest { method: method.clone(), path: path.clone(), query, headers, body: body_json.clone() };
    mock.requests.lock().unwrap().push(recorded.clone());

    if path == "/oauth2/v3/certs" {
        return json_response(StatusCode::OK, serde_json::from_str(JWKS).unwrap_or(Value::Null));
    }

    let Some(resource) = path.strip_prefix("/rest/v1/") else {
        return json_response(StatusCode::NOT_FOUND, json!({"message": "not found"}));
    };

    match (method.as_str(), resource) {
        ("POST", "rpc/verify_user_credentials") => {
            let body = body_json.unwrap_or(Value::Null);
            if body["p_email"] == OFFICER_EMAIL && body["p_password"] == OFFICER_PASSWORD {
                json_response(StatusCode::OK, json!([officer_row()]))
            } else {
                json_response(StatusCode::OK, json!([]))
            }
        }
        ("POST", function) if function.starts_with("rpc/") => {
            json_response(StatusCode::OK, json!({"function": &function[4..], "params": body_json}))
        }
        ("GET", "auth_providers") => json_response(StatusCode::OK, json!([{"client_id": GOOGLE_CLIENT_ID}])),
        ("GET", "users") => {
            // Exact match: a quoted value would be compared with its quotes upstream
            let email = recorded.param("email").and_then(|e| e.strip_prefix("eq."));
            let rows = match email {
                Some(OFFICER_EMAIL) => json!([officer_row()]),
                Some(REGISTERED_GOOGLE_EMAIL) => json!([google_row()]),
                _ => json!([]),
            };
            json_response(StatusCode::OK, rows)
        }
        ("PATCH", "users") => StatusCode::NO_CONTENT.into_response(),
        (_, "broken") => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({"code": "XX000", "message": "relation is on fire"}),
        ),
        ("HEAD", _) => {
            let total = match recorded.param("status") {
                Some("eq.open") => 3,
                Some("eq.closed") => 4,
                _ => 7,
            };
            (StatusCode::OK, [("content-range", format!("*/{}", total))]).into_response()
        }
        ("GET", _) => (
            StatusCode::OK,
            [("content-type", "application/json"), ("content-range", "0-1/25")],
            json!([{"id": 1, "status": "active"}, {"id": 2, "status": "active"}]).to_string(),
        )
            .into_response(),
        ("POST", _) => {
            let rows = match body_json {
                Some(Value::Array(rows)) => Value::Array(rows),
                Some(row) => json!([row]),
                None => json!([]),
            };
            json_response(StatusCode::CREATED, rows)
        }
        ("PATCH", _) => json_response(StatusCode::OK, json!([body_json])),
        ("DELETE", _) => json_response(StatusCode::OK, json!([])),
        _ => json_response(StatusCode::METHOD_NOT_ALLOWED, json!({"message": "unsupported"})),
    }
}
