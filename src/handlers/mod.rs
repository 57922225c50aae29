// handlers/mod.rs - Two-tier handler layout
//
// Public (no auth) → /auth/*
// Protected (auth middleware) → /proxy/*

pub mod protected;
pub mod public;

use axum::{response::Response, Extension};

use crate::error::ApiError;
use crate::middleware::RequestId;

/// Fallback for any route that does not exist.
pub async fn not_found(request_id: Option<Extension<RequestId>>) -> Response {
    let request_id = request_id.map(|Extension(id)| id).unwrap_or_default();
    ApiError::not_found("Route not found").respond(&request_id)
}
