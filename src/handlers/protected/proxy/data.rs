use axum::response::Response;

use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::proxy::translate::{translate, ForwardContext};
use crate::proxy::{reshape, DataOperation};
use crate::AppState;

/// select / insert / update / delete / function: one upstream call, reshaped.
pub(super) async fn forward(
    state: &AppState,
    operation: &DataOperation,
    ctx: &ForwardContext,
    request_id: &RequestId,
) -> Result<Response, ApiError> {
    let request = translate(operation, ctx);
    tracing::debug!("Forwarding {} {} ?{}", request.method, request.path, request.query);

    let upstream = state.data_api.send(request).await?;
    Ok(reshape::data_response(operation, upstream, request_id))
}
