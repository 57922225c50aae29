use axum::http::Method;
use serde_json::Value;
use std::sync::Arc;

use super::{first_row, DirectoryError};
use crate::filter::{join_pairs, encode_value};
use crate::upstream::{DataApi, UpstreamRequest};

/// Identity-provider settings kept in durable storage rather than in code.
#[derive(Clone)]
pub struct ProviderService {
    api: Arc<dyn DataApi>,
    table: String,
}

impl ProviderService {
    pub fn new(api: Arc<dyn DataApi>, table: impl Into<String>) -> Self {
        Self { api, table: table.into() }
    }

    /// OAuth client id registered for `provider`, used as the token audience.
    pub async fn client_id(&self, provider: &str) -> Result<Option<String>, DirectoryError> {
        let query = join_pairs(&[
            ("select".to_string(), "client_id".to_string()),
            ("provider".to_string(), format!("eq.{}", encode_value(provider))),
            ("limit".to_string(), "1".to_string()),
        ]);
        let response = self.api.send(UpstreamRequest::new(Method::GET, &self.table).query(query)).await?;
        if !response.status.is_success() {
            return Err(DirectoryError::from_status(&response));
        }
        let body = response.json().map_err(|e| DirectoryError::Decode(e.to_string()))?;
        Ok(first_row(body)
            .and_then(|row| row.get("client_id").and_then(Value::as_str).map(str::to_string))
            .filter(|id| !id.is_empty()))
    }
}
