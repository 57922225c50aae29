use axum::{extract::Request, middleware::Next, response::Response};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;

use super::request_id::RequestId;
use crate::error::ApiError;

/// Convert a panic anywhere below this layer into a 500 envelope.
/// The panic detail is logged with the request id and never returned.
pub async fn recover_middleware(request: Request, next: Next) -> Response {
    let request_id = request.extensions().get::<RequestId>().cloned().unwrap_or_default();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(response) => response,
        Err(panic) => {
            tracing::error!(
                "Unhandled panic in {} {} [request {}]: {}",
                method,
                path,
                request_id,
                panic_message(panic.as_ref())
            );
            ApiError::internal_server_error("An unexpected error occurred").respond(&request_id)
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
