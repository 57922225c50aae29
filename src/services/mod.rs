pub mod provider_service;
pub mod user_service;

use axum::http::StatusCode;
use thiserror::Error;

use crate::upstream::UpstreamError;

pub use provider_service::ProviderService;
pub use user_service::{UserRecord, UserService};

/// Failures reading or writing the user store and provider configuration.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("data API returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("unexpected response shape: {0}")]
    Decode(String),
}

impl DirectoryError {
    pub(crate) fn from_status(response: &crate::upstream::UpstreamResponse) -> Self {
        DirectoryError::Status {
            status: response.status,
            body: String::from_utf8_lossy(&response.body).chars().take(200).collect(),
        }
    }
}

/// First row of a data API response, which may be an array, one object or null.
pub(crate) fn first_row(value: serde_json::Value) -> Option<serde_json::Value> {
    match value {
        serde_json::Value::Array(rows) => rows.into_iter().next(),
        serde_json::Value::Object(_) => Some(value),
        _ => None,
    }
}
