use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::AppState;

const ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const ALLOW_HEADERS: &str = "Authorization, Content-Type, Accept, Accept-Language, Cache-Control, Prefer, X-Request-ID";
const EXPOSE_HEADERS: &str = "X-Request-ID, X-RateLimit-Limit, X-RateLimit-Remaining, X-RateLimit-Reset, Retry-After";
const MAX_AGE_SECS: &str = "86400";

/// Answer preflight requests and stamp fresh CORS headers on every response.
///
/// Any CORS header already on the response (for instance one copied from the
/// data API) is removed first, so exactly one set is ever sent.
pub async fn cors_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let origin = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let allowed = &state.config.security.cors_origins;

    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::OK.into_response();
        apply_cors_headers(response.headers_mut(), origin.as_deref(), allowed);
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut(), origin.as_deref(), allowed);
    response
}

/// Origin to echo: the request's own when allowed, else the first configured one.
pub fn resolve_origin<'a>(origin: Option<&'a str>, allowed: &'a [String]) -> Option<&'a str> {
    let wildcard = allowed.iter().any(|o| o == "*");
    match origin {
        Some(origin) if wildcard || allowed.iter().any(|o| o == origin) => Some(origin),
        None if wildcard => Some("*"),
        _ => allowed.iter().map(String::as_str).find(|o| *o != "*"),
    }
}

pub fn apply_cors_headers(headers: &mut HeaderMap, origin: Option<&str>, allowed: &[String]) {
    let stale: Vec<_> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("access-control-"))
        .cloned()
        .collect();
    for name in stale {
        headers.remove(name);
    }

    let resolved = resolve_origin(origin, allowed);
    if let Some(value) = resolved.and_then(|o| HeaderValue::from_str(o).ok()) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    // Credentials only for origins named in the list, never for one let in by "*"
    if resolved.is_some_and(|o| allowed.iter().any(|a| a == o)) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    }
    headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(ALLOW_METHODS));
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(ALLOW_HEADERS));
    headers.insert(header::ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static(EXPOSE_HEADERS));
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static(MAX_AGE_SECS));
    headers.append(header::VARY, HeaderValue::from_static("Origin"));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origins(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn allowed_origin_is_echoed() {
        let allowed = origins(&["https://app.example.com", "https://admin.example.com"]);
        assert_eq!(resolve_origin(Some("https://admin.example.com"), &allowed), Some("https://admin.example.com"));
    }

    #[test]
    fn foreign_origin_gets_first_configured() {
        let allowed = origins(&["https://app.example.com"]);
        assert_eq!(resolve_origin(Some("https://evil.example.com"), &allowed), Some("https://app.example.com"));
        assert_eq!(resolve_origin(None, &allowed), Some("https://app.example.com"));
    }

    #[test]
    fn wildcard_echoes_any_origin() {
        let allowed = origins(&["*"]);
        assert_eq!(resolve_origin(Some("https://x.example.com"), &allowed), Some("https://x.example.com"));
        assert_eq!(resolve_origin(None, &allowed), Some("*"));
    }

    #[test]
    fn credentials_only_for_listed_origins() {
        let mut headers = HeaderMap::new();
        apply_cors_headers(&mut headers, Some("https://x.example.com"), &origins(&["*"]));
        assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "https://x.example.com");
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).is_none());

        let mut headers = HeaderMap::new();
        apply_cors_headers(&mut headers, Some("https://app.example.com"), &origins(&["*", "https://app.example.com"]));
        assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");

        let mut headers = HeaderMap::new();
        apply_cors_headers(&mut headers, Some("https://evil.example.com"), &origins(&["https://app.example.com"]));
        assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "https://app.example.com");
        assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS).unwrap(), "true");
    }

    #[test]
    fn upstream_cors_headers_replaced() {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert("access-control-allow-private-network", HeaderValue::from_static("true"));
        apply_cors_headers(&mut headers, Some("https://app.example.com"), &origins(&["https://app.example.com"]));
        assert_eq!(headers.get_all(header::ACCESS_CONTROL_ALLOW_ORIGIN).iter().count(), 1);
        assert_eq!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(), "https://app.example.com");
        assert!(headers.get("access-control-allow-private-network").is_none());
        assert_eq!(headers.get(header::ACCESS_CONTROL_MAX_AGE).unwrap(), "86400");
    }
}
