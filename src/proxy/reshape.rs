//! Turning upstream responses into the public response contract.

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::{json, Map, Value};

use super::DataOperation;
use crate::error::ApiError;
use crate::middleware::request_id::RequestId;
use crate::upstream::UpstreamResponse;

/// Upstream response headers a caller may see.
const FORWARDED_RESPONSE_HEADERS: &[HeaderName] = &[
    header::CACHE_CONTROL,
    header::ETAG,
    header::LAST_MODIFIED,
    header::LOCATION,
];

fn copy_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for name in FORWARDED_RESPONSE_HEADERS {
        if let Some(value) = from.get(name) {
            to.insert(name.clone(), value.clone());
        }
    }
}

/// Envelope a successful data response, or pass an upstream error through.
pub fn data_response(operation: &DataOperation, upstream: UpstreamResponse, request_id: &RequestId) -> Response {
    if !upstream.status.is_success() {
        return passthrough(upstream, request_id);
    }

    let data = match upstream.json() {
        Ok(data) => data,
        Err(e) => {
            tracing::error!("Upstream returned {} with an unreadable body: {}", upstream.status, e);
            return ApiError::bad_gateway("The data service returned an invalid response").respond(request_id);
        }
    };

    let body = match operation {
        DataOperation::Select(filter) => {
            let rows = data.as_array().map(|rows| rows.len() as u64).unwrap_or(0);
            let count = if filter.exact_count() {
                upstream.content_range_total().unwrap_or(rows)
            } else {
                rows
            };
            json!({ "data": data, "count": count, "requestId": request_id.as_str() })
        }
        _ => json!({ "data": data, "requestId": request_id.as_str() }),
    };

    // the envelope always has a body, which 204 cannot carry
    let status = if upstream.status == StatusCode::NO_CONTENT { StatusCode::OK } else { upstream.status };
    let mut response = (status, Json(body)).into_response();
    copy_headers(&upstream.headers, response.headers_mut());
    response
}

/// Upstream error statuses reach the caller unchanged. A JSON object body
/// gains `requestId`; anything else is forwarded byte for byte.
pub fn passthrough(upstream: UpstreamResponse, request_id: &RequestId) -> Response {
    tracing::warn!("Data API responded {} to request {}", upstream.status, request_id);

    if let Ok(Value::Object(mut body)) = serde_json::from_slice::<Value>(&upstream.body) {
        body.insert("requestId".to_string(), Value::String(request_id.as_str().to_string()));
        let mut response = (upstream.status, Json(Value::Object(body))).into_response();
        copy_headers(&upstream.headers, response.headers_mut());
        return response;
    }

    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    let headers = response.headers_mut();
    copy_headers(&upstream.headers, headers);
    for name in [header::CONTENT_TYPE, header::CONTENT_LENGTH] {
        if let Some(value) = upstream.headers.get(&name) {
            headers.insert(name, value.clone());
        }
    }
    response
}

/// `{name: count, ..., requestId}` for a stats batch.
pub fn stats_response(counts: Vec<(String, u64)>, request_id: &RequestId) -> Response {
    let mut body = Map::new();
    for (name, count) in counts {
        body.insert(name, json!(count));
    }
    body.insert("requestId".to_string(), json!(request_id.as_str()));
    (StatusCode::OK, Json(Value::Object(body))).into_response()
}
