mod common;

use anyhow::Result;
use reqwest::{Method, StatusCode};
use serde_json::Value;

#[tokio::test]
async fn health_reports_caller_and_request_id() -> Result<()> {
    let app = common::spawn_app(|_| {}).await?;
    let token = app.token("user-1", "viewer@fsp.co.za", Some("viewer"));

    let res = app.client.get(app.url("/proxy/health")).bearer_auth(&token).send().await?;
    assert_eq!(res.status(), StatusCode::OK);

    let header_id = res.headers().get("x-request-id").expect("request id header").to_str()?.to_string();
    let body: Value = res.json().await?;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["user"]["id"], "user-1");
    assert_eq!(body["user"]["email"], "viewer@fsp.co.za");
    assert_eq!(body["requestId"], header_id.as_str());
    assert!(app.upstream.recorded().is_empty());
    Ok(())
}

#[tokio::test]
async fn health_accepts_post_too() -> Result<()> {
    let app = common::spawn_app(|_| {}).await?;
    let token = app.token("user-1", "viewer@fsp.co.za", None);

    let res = app.post_proxy("health", Some(&token), serde_json::json!({})).await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn preflight_short_circuits_without_auth() -> Result<()> {
    let app = common::spawn_app(|_| {}).await?;

    let res = app
        .client
        .request(Method::OPTIONS, app.url("/proxy/select"))
        .header("origin", "https://app.example.com")
        .header("access-control-request-method", "POST")
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::OK);
    let headers = res.headers();
    assert_eq!(headers.get("access-control-allow-origin").unwrap(), "https://app.example.com");
    assert_eq!(headers.get("access-control-allow-credentials").unwrap(), "true");
    assert!(headers.get("access-control-allow-headers").unwrap().to_str()?.contains("Authorization"));
    assert!(headers.get("x-request-id").is_some());
    assert!(res.text().await?.is_empty());
    assert!(app.upstream.recorded().is_empty());
    Ok(())
}

#[tokio::test]
async fn error_responses_carry_cors_headers() -> Result<()> {
    let app = common::spawn_app(|_| {}).await?;

    let res = app
        .client
        .post(app.url("/proxy/select"))
        .header("origin", "https://evil.example.com")
        .json(&serde_json::json!({"table": "clients"}))
        .send()
        .await?;

    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    // foreign origins get the configured origin, never their own
    assert_eq!(res.headers().get("access-control-allow-origin").unwrap(), "https://app.example.com");
    assert!(res.headers().get("x-request-id").is_some());
    Ok(())
}

#[tokio::test]
async fn unknown_operation_is_404_after_auth() -> Result<()> {
    let app = common::spawn_app(|_| {}).await?;
    let token = app.token("user-1", "viewer@fsp.co.za", Some("viewer"));

    let res = app.post_proxy("truncate", Some(&token), serde_json::json!({"table": "clients"})).await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: Value = res.json().await?;
    assert_eq!(body["error"], "Not Found");
    assert!(body["requestId"].is_string());

    // wrong method on a known operation
    let res = app.client.get(app.url("/proxy/select")).bearer_auth(&token).send().await?;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // anything outside the known routes still needs a credential first
    let res = app.client.get(app.url("/admin")).send().await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    assert!(app.upstream.data_requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn well_formed_incoming_request_id_is_reused() -> Result<()> {
    let app = common::spawn_app(|_| {}).await?;
    let token = app.token("user-1", "viewer@fsp.co.za", Some("viewer"));

    let res = app
        .client
        .get(app.url("/proxy/health"))
        .bearer_auth(&token)
        .header("x-request-id", "trace-abc-123")
        .send()
        .await?;
    assert_eq!(res.headers().get("x-request-id").unwrap(), "trace-abc-123");
    let body: Value = res.json().await?;
    assert_eq!(body["requestId"], "trace-abc-123");

    let res = app
        .client
        .get(app.url("/proxy/health"))
        .bearer_auth(&token)
        .header("x-request-id", "bad id with spaces")
        .send()
        .await?;
    assert_ne!(res.headers().get("x-request-id").unwrap(), "bad id with spaces");
    Ok(())
}
