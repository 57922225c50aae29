use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};

use super::{DataOperation, StatQuery};
use crate::auth::Principal;
use crate::filter::{Filter, FilterError, FilterOptions};
use crate::middleware::request_id::RequestId;
use crate::upstream::{CallerContext, UpstreamRequest, FORWARDED_REQUEST_HEADERS};

const PREFER: HeaderName = HeaderName::from_static("prefer");
const RETURN_REPRESENTATION: &str = "return=representation";

/// Per-request inputs every upstream call carries.
#[derive(Debug, Clone)]
pub struct ForwardContext {
    pub caller: CallerContext,
    pub headers: HeaderMap,
}

impl ForwardContext {
    pub fn new(principal: &Principal, request_id: &RequestId, source_ip: Option<String>, incoming: &HeaderMap) -> Self {
        let mut headers = HeaderMap::new();
        for name in &FORWARDED_REQUEST_HEADERS {
            for value in incoming.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }

        Self {
            caller: CallerContext {
                user_id: Some(principal.id.clone()),
                email: principal.email.clone(),
                request_id: Some(request_id.as_str().to_string()),
                source_ip,
            },
            headers,
        }
    }

    fn request(&self, method: Method, path: impl Into<String>) -> UpstreamRequest {
        let mut request = UpstreamRequest::new(method, path).caller(self.caller.clone());
        request.headers = self.headers.clone();
        request
    }
}

/// Build the single upstream request for a data operation.
pub fn translate(operation: &DataOperation, ctx: &ForwardContext) -> UpstreamRequest {
    match operation {
        DataOperation::Select(filter) => {
            let request = ctx.request(Method::GET, filter.table_name()).query(filter.to_query_string());
            if filter.exact_count() {
                with_exact_count(request)
            } else {
                request
            }
        }
        DataOperation::Insert { table, data } => ctx
            .request(Method::POST, table.as_str())
            .json(data.clone())
            .prefer_default(RETURN_REPRESENTATION),
        DataOperation::Update { filter, data } => ctx
            .request(Method::PATCH, filter.table_name())
            .query(filter.to_filter_string())
            .json(data.clone())
            .prefer_default(RETURN_REPRESENTATION),
        DataOperation::Delete(filter) => ctx
            .request(Method::DELETE, filter.table_name())
            .query(filter.to_filter_string())
            .prefer_default(RETURN_REPRESENTATION),
        DataOperation::Function { name, params } => ctx
            .request(Method::POST, format!("rpc/{}", name))
            .json(params.clone()),
    }
}

/// Count request for one stat. Fails when the stat's filters do not validate.
pub fn stat_request(
    table: &str,
    stat: &StatQuery,
    options: &FilterOptions,
    ctx: &ForwardContext,
) -> Result<UpstreamRequest, FilterError> {
    let mut filter = Filter::new(table, options.clone())?;
    if let Some(filters) = &stat.filters {
        filter.where_clause(filters)?;
    }
    let mut request = ctx.request(Method::HEAD, table).query(filter.to_filter_string());
    request.headers.insert(PREFER, HeaderValue::from_static("count=exact"));
    Ok(request)
}

fn with_exact_count(mut request: UpstreamRequest) -> UpstreamRequest {
    let combined = match request.headers.get(&PREFER).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.contains("count=") => HeaderValue::from_str(&format!("{}, count=exact", existing)).ok(),
        Some(_) => None,
        None => Some(HeaderValue::from_static("count=exact")),
    };
    if let Some(value) = combined {
        request.headers.insert(PREFER, value);
    }
    request
}
