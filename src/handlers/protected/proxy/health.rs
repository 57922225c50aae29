use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde_json::json;

use crate::auth::Principal;
use crate::middleware::RequestId;

/// Liveness plus a confirmation of who the proxy thinks the caller is.
pub(super) fn respond(principal: &Principal, request_id: &RequestId) -> Response {
    Json(json!({
        "status": "ok",
        "user": {
            "id": principal.id,
            "email": principal.email,
        },
        "timestamp": Utc::now().to_rfc3339(),
        "requestId": request_id.as_str(),
    }))
    .into_response()
}
