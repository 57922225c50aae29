use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use serde_json::Value;
use std::net::SocketAddr;

use super::request_id::RequestId;
use crate::auth::{peek_subject, token_fingerprint, AuthError, Principal, TrustSource};
use crate::error::ApiError;
use crate::rate_limit::RateLimitStatus;
use crate::request_filter::{RequestSummary, FUNCTION_PATH};
use crate::AppState;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Caller's network address as seen by the proxy, if known.
#[derive(Clone, Debug, Default)]
pub struct ClientAddress(pub Option<String>);

/// Gatekeeper for every `/proxy/*` request.
///
/// Runs exemption, rate limiting, credential validation and the request
/// filter in that order. On success the `Principal`, `ClientAddress` and
/// `RateLimitStatus` are attached as request extensions and the buffered body
/// is handed on unchanged.
pub async fn auth_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let request_id = request.extensions().get::<RequestId>().cloned().unwrap_or_default();
    let (mut parts, body) = request.into_parts();

    let bytes = match axum::body::to_bytes(body, state.config.api.max_request_size_bytes).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::bad_request(format!(
                "Request body exceeds the maximum size of {} bytes",
                state.config.api.max_request_size_bytes
            ))
            .respond(&request_id);
        }
    };
    // A body that is not JSON is rejected later by the handler with a proper 400.
    let json_body: Option<Value> = serde_json::from_slice(&bytes).ok();

    let path = parts.uri.path().to_string();
    let exempt = path == FUNCTION_PATH
        && json_body
            .as_ref()
            .and_then(|b| b.get("function"))
            .and_then(Value::as_str)
            .is_some_and(|name| state.config.is_exempt_function(name));

    let source_ip = client_ip(&parts.headers, parts.extensions.get::<ConnectInfo<SocketAddr>>());
    let token = if exempt { None } else { extract_jwt_from_headers(&parts.headers).ok() };

    let client_id = token
        .as_deref()
        .and_then(peek_subject)
        .or_else(|| source_ip.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let rate = state.rate_limiter.check(&client_id).await;
    if !rate.allowed {
        tracing::warn!("Rate limit exceeded for {} on {}", client_id, path);
        let mut response = ApiError::too_many_requests("Rate limit exceeded, please retry later").respond(&request_id);
        let headers = response.headers_mut();
        headers.insert(header::RETRY_AFTER, HeaderValue::from(rate.retry_after_secs(Utc::now())));
        apply_rate_limit_headers(headers, &rate);
        return response;
    }

    let principal = if exempt {
        tracing::debug!("Exempt function call on {}, using anonymous principal", path);
        Principal::anonymous()
    } else {
        let outcome = match token.as_deref() {
            Some(token) => {
                tracing::debug!("Validating Bearer [REDACTED] ({})", token_fingerprint(token));
                state.credentials.validate(token).await
            }
            None => Err(AuthError::MissingToken),
        };
        match outcome {
            Ok(principal) if principal.source == TrustSource::Google => match registered(&state, principal).await {
                Ok(principal) => principal,
                Err(e) => {
                    let mut response = e.respond(&request_id);
                    apply_rate_limit_headers(response.headers_mut(), &rate);
                    return response;
                }
            },
            Ok(principal) => principal,
            Err(e) => {
                let mut response = ApiError::from(e).respond(&request_id);
                apply_rate_limit_headers(response.headers_mut(), &rate);
                return response;
            }
        }
    };

    let decision = state.request_filter.filter_request(
        &RequestSummary { method: &parts.method, path: &path, body: json_body.as_ref() },
        &principal,
    );
    if !decision.allowed {
        let reason = decision.reason.unwrap_or_else(|| "Request not permitted".to_string());
        let mut response = ApiError::forbidden(reason).respond(&request_id);
        apply_rate_limit_headers(response.headers_mut(), &rate);
        return response;
    }

    parts.extensions.insert(principal);
    parts.extensions.insert(ClientAddress(source_ip));
    parts.extensions.insert(rate);

    let mut response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
    apply_rate_limit_headers(response.headers_mut(), &rate);
    response
}

/// External identities only get in with an active user-store account; the
/// account supplies the id, name and role.
async fn registered(state: &AppState, principal: Principal) -> Result<Principal, ApiError> {
    let email = principal
        .email
        .clone()
        .ok_or_else(|| ApiError::access_denied("Identity token carries no email address"))?;

    match state.users.find_by_email(&email).await? {
        Some(user) if user.is_active => Ok(Principal {
            id: user.id,
            name: user.name.or(principal.name),
            role: user.role,
            ..principal
        }),
        Some(_) => {
            tracing::warn!("Inactive account {} presented a Google credential", principal.id);
            Err(ApiError::access_denied("This account has been deactivated"))
        }
        None => {
            tracing::warn!("Unregistered Google identity {} refused", principal.id);
            Err(ApiError::access_denied(format!(
                "User {} is not registered. Please contact your administrator.",
                email
            )))
        }
    }
}

pub fn apply_rate_limit_headers(headers: &mut HeaderMap, status: &RateLimitStatus) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(status.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(status.remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(status.reset));
}

/// First hop of `X-Forwarded-For`, else the socket peer.
fn client_ip(headers: &HeaderMap, peer: Option<&ConnectInfo<SocketAddr>>) -> Option<String> {
    headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|ConnectInfo(addr)| addr.ip().to_string()))
}

/// Extract the bearer token from the Authorization header
pub fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, AuthError> {
    let auth_header = headers.get(header::AUTHORIZATION).ok_or(AuthError::MissingToken)?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| AuthError::Malformed("Invalid Authorization header format".to_string()))?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        Some(_) => Err(AuthError::MissingToken),
        None => Err(AuthError::Malformed("Authorization header must use Bearer token format".to_string())),
    }
}
