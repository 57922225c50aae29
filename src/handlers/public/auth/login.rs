// handlers/public/auth/login.rs - POST /auth/login handler

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Extension,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use crate::auth::oauth::GOOGLE_PROVIDER;
use crate::auth::{token_fingerprint, AuthError};
use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::services::UserRecord;
use crate::AppState;

const DATABASE_PROVIDER: &str = "database";

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub provider: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub id_token: Option<String>,
    /// Accepted for client compatibility; never used.
    pub access_token: Option<String>,
}

/**
 * POST /auth/login - Exchange credentials for a first-party token
 *
 * Database login:
 * ```json
 * { "email": "user@example.com", "password": "..." }
 * ```
 *
 * Google login:
 * ```json
 * { "provider": "google", "id_token": "eyJhbGciOiJSUzI1NiI..." }
 * ```
 *
 * Both flows answer with the same token type:
 * ```json
 * {
 *   "success": true,
 *   "token": "eyJhbGciOiJIUzI1NiI...",
 *   "expiresIn": 86400,
 *   "user": { "id": "...", "email": "...", "name": "...", "role": "..." },
 *   "requestId": "..."
 * }
 * ```
 */
pub async fn login(State(state): State<AppState>, Extension(request_id): Extension<RequestId>, body: Bytes) -> Response {
    match login_inner(&state, &body).await {
        Ok(mut body) => {
            body["requestId"] = json!(request_id.as_str());
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(e) => e.respond(&request_id),
    }
}

async fn login_inner(state: &AppState, body: &[u8]) -> Result<serde_json::Value, ApiError> {
    let request: LoginRequest = if body.iter().all(u8::is_ascii_whitespace) {
        LoginRequest::default()
    } else {
        serde_json::from_slice(body).map_err(|e| ApiError::invalid_json(format!("Invalid login request: {}", e)))?
    };

    let provider = request.provider.as_deref().unwrap_or(DATABASE_PROVIDER).to_ascii_lowercase();
    let (user, provider) = match provider.as_str() {
        DATABASE_PROVIDER | "email" => (database_login(state, &request).await?, DATABASE_PROVIDER),
        GOOGLE_PROVIDER => (google_login(state, &request).await?, GOOGLE_PROVIDER),
        other => return Err(ApiError::bad_request(format!("Unsupported login provider '{}'", other))),
    };

    if let Err(e) = state.users.touch_last_login(&user.id).await {
        tracing::warn!("Failed to record last login for user {}: {}", user.id, e);
    }

    let issued = state
        .tokens
        .issue(&user.id, &user.email, user.name.clone(), user.role.clone(), provider)
        .map_err(|e| {
            tracing::error!("Token issuing failed for user {}: {}", user.id, e);
            ApiError::internal_server_error("Unable to complete login")
        })?;

    tracing::info!("User {} logged in via {}", user.id, provider);

    Ok(json!({
        "success": true,
        "token": issued.token,
        "expiresIn": issued.expires_in,
        "user": {
            "id": user.id,
            "email": user.email,
            "name": user.name,
            "role": user.role,
        },
    }))
}

async fn database_login(state: &AppState, request: &LoginRequest) -> Result<UserRecord, ApiError> {
    let mut field_errors = HashMap::new();
    let email = request.email.as_deref().map(str::trim).unwrap_or_default();
    if !is_valid_email(email) {
        field_errors.insert("email".to_string(), "A valid email address is required".to_string());
    }
    let password = request.password.as_deref().unwrap_or_default();
    if password.is_empty() {
        field_errors.insert("password".to_string(), "Password is required".to_string());
    }
    if !field_errors.is_empty() {
        return Err(ApiError::validation_error("Invalid login request", Some(field_errors)));
    }

    if !state.config.security.enable_database_login {
        return Err(ApiError::service_unavailable("Password login is currently disabled"));
    }

    let user = state
        .users
        .verify_credentials(email, password)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid email or password"))?;

    if !user.is_active {
        tracing::warn!("Login attempt for inactive user {}", user.id);
        return Err(ApiError::unauthorized("Invalid email or password"));
    }
    Ok(user)
}

async fn google_login(state: &AppState, request: &LoginRequest) -> Result<UserRecord, ApiError> {
    let id_token = request
        .id_token
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing required field 'id_token'"))?;

    let principal = state.google.verify(id_token).await.map_err(|e| {
        tracing::warn!("Google login rejected for Bearer [REDACTED] ({}): {}", token_fingerprint(id_token), e);
        match e {
            AuthError::ProviderConfig(_) => ApiError::service_unavailable("Google login is not configured"),
            _ => ApiError::unauthorized("Invalid Google credential"),
        }
    })?;

    let email = principal.email.unwrap_or_default();
    let user = state.users.find_by_email(&email).await?.ok_or_else(|| {
        tracing::warn!("Google login for unregistered address {}", email);
        ApiError::access_denied(format!("User {} is not registered. Please contact your administrator.", email))
    })?;

    if !user.is_active {
        return Err(ApiError::access_denied(format!("User {} is not active. Please contact your administrator.", email)));
    }
    Ok(user)
}

/// local@domain.tld, no whitespace.
fn is_valid_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("officer@fsp.co.za"));
        assert!(is_valid_email("a@b.com"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@b.com"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("a@.com"));
        assert!(!is_valid_email("a b@c.com"));
        assert!(!is_valid_email("a@b@c.com"));
    }

    #[test]
    fn login_request_accepts_google_shape() {
        let request: LoginRequest =
            serde_json::from_str(r#"{"provider":"google","id_token":"x","access_token":"y"}"#).unwrap();
        assert_eq!(request.provider.as_deref(), Some("google"));
        assert_eq!(request.id_token.as_deref(), Some("x"));
        assert!(request.email.is_none());
    }
}
