// handlers/protected/proxy/mod.rs - POST /proxy/:operation

mod data;
mod health;
mod stats;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, Method},
    response::Response,
    Extension,
};
use serde_json::Value;

use crate::auth::Principal;
use crate::error::ApiError;
use crate::filter::FilterOptions;
use crate::middleware::{ClientAddress, RequestId};
use crate::proxy::translate::ForwardContext;
use crate::proxy::{AccessTarget, OperationKind, ProxyOperation};
use crate::AppState;

/// Authorize, validate and dispatch one proxy operation.
pub async fn proxy(
    State(state): State<AppState>,
    Path(operation): Path<String>,
    method: Method,
    headers: HeaderMap,
    Extension(principal): Extension<Principal>,
    Extension(request_id): Extension<RequestId>,
    Extension(ClientAddress(source_ip)): Extension<ClientAddress>,
    body: Bytes,
) -> Response {
    let result = dispatch(&state, &operation, &method, &headers, &principal, &request_id, source_ip, &body).await;
    match result {
        Ok(response) => response,
        Err(e) => e.respond(&request_id),
    }
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    state: &AppState,
    operation: &str,
    method: &Method,
    headers: &HeaderMap,
    principal: &Principal,
    request_id: &RequestId,
    source_ip: Option<String>,
    body: &[u8],
) -> Result<Response, ApiError> {
    let kind = OperationKind::parse(operation)
        .filter(|kind| method == Method::POST || (*kind == OperationKind::Health && method == Method::GET))
        .ok_or_else(|| ApiError::not_found(format!("Unknown proxy operation: {} /proxy/{}", method, operation)))?;

    if kind == OperationKind::Health {
        return Ok(health::respond(principal, request_id));
    }

    let value: Value = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        serde_json::from_slice(body).map_err(|e| ApiError::invalid_json(format!("Invalid JSON body: {}", e)))?
    };

    if let Some(target) = AccessTarget::from_body(kind, &value)? {
        let decision = state
            .access
            .check_user_permission(principal, target.resource_type, &target.name, target.action)
            .await;
        if !decision.allowed {
            tracing::warn!("RBAC denied {} for {}: {}", kind.as_str(), principal.id, decision.message);
            return Err(ApiError::forbidden(decision.message));
        }
    }

    let options = FilterOptions::from(&state.config.filter);
    let parsed = ProxyOperation::parse(kind, body, &options)?;
    if parsed.is_unscoped_mutation() && !state.config.request_filter.allow_unfiltered_mutations {
        tracing::warn!("Refused unscoped {} from {}", kind.as_str(), principal.id);
        return Err(ApiError::forbidden("Update and delete requests must include filters"));
    }
    let ctx = ForwardContext::new(principal, request_id, source_ip, headers);

    match parsed {
        ProxyOperation::Data(op) => data::forward(state, &op, &ctx, request_id).await,
        ProxyOperation::Stats { table, stats } => stats::collect(state, &table, &stats, &options, &ctx, request_id).await,
        ProxyOperation::Health => Ok(health::respond(principal, request_id)),
    }
}
