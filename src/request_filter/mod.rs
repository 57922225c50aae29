//! Coarse allow/deny rules applied to every authenticated request before
//! dispatch, independent of role grants.

use axum::http::Method;
use serde_json::Value;

use crate::auth::Principal;
use crate::config::RequestFilterConfig;

pub const FUNCTION_PATH: &str = "/proxy/function";
const MUTATION_PATHS: &[&str] = &["/proxy/update", "/proxy/delete"];

/// What the filter sees of a request.
#[derive(Debug, Clone, Copy)]
pub struct RequestSummary<'a> {
    pub method: &'a Method,
    pub path: &'a str,
    pub body: Option<&'a Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl FilterDecision {
    fn allow() -> Self {
        Self { allowed: true, reason: None }
    }

    fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, reason: Some(reason.into()) }
    }
}

#[derive(Debug, Clone)]
struct BlockedRoute {
    /// `None` blocks every method on the path.
    method: Option<Method>,
    path: String,
}

#[derive(Debug, Clone)]
pub struct RequestFilter {
    blocked: Vec<BlockedRoute>,
    allow_unfiltered_mutations: bool,
}

impl RequestFilter {
    pub fn from_config(config: &RequestFilterConfig) -> Self {
        let blocked = config
            .blocked_routes
            .iter()
            .filter_map(|entry| {
                let mut parts = entry.split_whitespace();
                match (parts.next(), parts.next(), parts.next()) {
                    (Some(path), None, None) if path.starts_with('/') => {
                        Some(BlockedRoute { method: None, path: path.to_string() })
                    }
                    (Some(method), Some(path), None) if path.starts_with('/') => {
                        match Method::from_bytes(method.to_ascii_uppercase().as_bytes()) {
                            Ok(method) => Some(BlockedRoute { method: Some(method), path: path.to_string() }),
                            Err(_) => {
                                tracing::warn!("Ignoring blocked route with invalid method: {}", entry);
                                None
                            }
                        }
                    }
                    _ => {
                        tracing::warn!("Ignoring malformed blocked route: {}", entry);
                        None
                    }
                }
            })
            .collect();

        Self {
            blocked,
            allow_unfiltered_mutations: config.allow_unfiltered_mutations,
        }
    }

    pub fn filter_request(&self, request: &RequestSummary<'_>, principal: &Principal) -> FilterDecision {
        let path = request.path.trim_end_matches('/');

        if let Some(route) = self
            .blocked
            .iter()
            .find(|r| r.path == path && r.method.as_ref().map_or(true, |m| m == request.method))
        {
            tracing::warn!("Blocked route {} {} requested by {}", request.method, route.path, principal.id);
            return FilterDecision::deny(format!("{} {} is not available", request.method, path));
        }

        if principal.is_anonymous() && path != FUNCTION_PATH {
            return FilterDecision::deny("Anonymous access is limited to function calls");
        }

        if !self.allow_unfiltered_mutations && MUTATION_PATHS.contains(&path) {
            let scoped = request
                .body
                .and_then(|body| body.get("filters"))
                .and_then(Value::as_object)
                .is_some_and(|filters| !filters.is_empty());
            if !scoped {
                return FilterDecision::deny("Update and delete requests must include filters");
            }
        }

        FilterDecision::allow()
    }
}
