use axum::http::Method;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{first_row, DirectoryError};
use crate::config::DirectoryConfig;
use crate::filter::{join_pairs, encode_value};
use crate::upstream::{DataApi, UpstreamRequest};

/// Minimal projection of a user-store row.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub role: Option<String>,
    pub is_active: bool,
}

impl UserRecord {
    /// Accepts numeric or string ids and either `full_name` or `name`.
    pub fn from_row(row: &Value) -> Option<Self> {
        let id = match row.get("id")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let email = row.get("email")?.as_str()?.to_string();
        let name = row
            .get("full_name")
            .or_else(|| row.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let role = row.get("role").and_then(Value::as_str).map(str::to_string);
        let is_active = row.get("is_active").and_then(Value::as_bool).unwrap_or(true);
        Some(Self { id, email, name, role, is_active })
    }
}

/// Reads and writes the user store through the data API.
#[derive(Clone)]
pub struct UserService {
    api: Arc<dyn DataApi>,
    table: String,
    verify_function: String,
}

impl UserService {
    pub fn new(api: Arc<dyn DataApi>, config: &DirectoryConfig) -> Self {
        Self {
            api,
            table: config.users_table.clone(),
            verify_function: config.verify_credentials_function.clone(),
        }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let query = join_pairs(&[
            ("select".to_string(), "*".to_string()),
            ("email".to_string(), format!("eq.{}", encode_value(&email.to_lowercase()))),
            ("limit".to_string(), "1".to_string()),
        ]);
        let response = self.api.send(UpstreamRequest::new(Method::GET, &self.table).query(query)).await?;
        if !response.status.is_success() {
            return Err(DirectoryError::from_status(&response));
        }
        let body = response.json().map_err(|e| DirectoryError::Decode(e.to_string()))?;
        Ok(first_row(body).as_ref().and_then(UserRecord::from_row))
    }

    /// Password check performed by a stored procedure; the hash never leaves the store.
    pub async fn verify_credentials(&self, email: &str, password: &str) -> Result<Option<UserRecord>, DirectoryError> {
        let request = UpstreamRequest::new(Method::POST, format!("rpc/{}", self.verify_function))
            .json(json!({ "p_email": email.to_lowercase(), "p_password": password }));
        let response = self.api.send(request).await?;
        if !response.status.is_success() {
            return Err(DirectoryError::from_status(&response));
        }
        let body = response.json().map_err(|e| DirectoryError::Decode(e.to_string()))?;
        Ok(first_row(body).as_ref().and_then(UserRecord::from_row))
    }

    pub async fn touch_last_login(&self, user_id: &str) -> Result<(), DirectoryError> {
        let query = format!("id=eq.{}", encode_value(user_id));
        let request = UpstreamRequest::new(Method::PATCH, &self.table)
            .query(query)
            .json(json!({ "last_login": Utc::now().to_rfc3339() }))
            .prefer_default("return=minimal");
        let response = self.api.send(request).await?;
        if !response.status.is_success() {
            return Err(DirectoryError::from_status(&response));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::StubDataApi;
    use axum::http::StatusCode;

    fn service(api: Arc<StubDataApi>) -> UserService {
        UserService::new(api, &DirectoryConfig::default())
    }

    #[tokio::test]
    async fn find_by_email_builds_encoded_query() {
        let api = Arc::new(StubDataApi::new());
        api.push_json(StatusCode::OK, json!([{"id": "u1", "email": "a@b.com", "full_name": "Ann", "role": "viewer"}]));
        let user = service(api.clone()).find_by_email("A@B.com").await.unwrap().unwrap();
        assert_eq!(user.id, "u1");
        assert_eq!(user.role.as_deref(), Some("viewer"));
        assert_eq!(user.name.as_deref(), Some("Ann"));

        let sent = api.requests();
        assert_eq!(sent[0].path, "users");
        assert_eq!(sent[0].query, "select=*&email=eq.a%40b.com&limit=1");
    }

    #[tokio::test]
    async fn missing_user_is_none() {
        let api = Arc::new(StubDataApi::new());
        api.push_json(StatusCode::OK, json!([]));
        assert!(service(api).find_by_email("x@y.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn verify_credentials_posts_rpc() {
        let api = Arc::new(StubDataApi::new());
        api.push_json(StatusCode::OK, json!({"id": 7, "email": "a@b.com"}));
        let user = service(api.clone()).verify_credentials("a@b.com", "pw").await.unwrap().unwrap();
        assert_eq!(user.id, "7");
        let sent = api.requests();
        assert_eq!(sent[0].method, Method::POST);
        assert_eq!(sent[0].path, "rpc/verify_user_credentials");
        assert_eq!(sent[0].body.as_ref().unwrap()["p_email"], "a@b.com");
    }

    #[tokio::test]
    async fn rejected_credentials_are_none() {
        let api = Arc::new(StubDataApi::new());
        api.push_json(StatusCode::OK, Value::Null);
        assert!(service(api).verify_credentials("a@b.com", "bad").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn touch_last_login_patches_row() {
        let api = Arc::new(StubDataApi::new());
        api.push_json(StatusCode::NO_CONTENT, Value::Null);
        service(api.clone()).touch_last_login("u1").await.unwrap();
        let sent = api.requests();
        assert_eq!(sent[0].method, Method::PATCH);
        assert_eq!(sent[0].query, "id=eq.u1");
        assert!(sent[0].body.as_ref().unwrap().get("last_login").is_some());
    }

    #[tokio::test]
    async fn error_status_surfaces() {
        let api = Arc::new(StubDataApi::new());
        api.push_json(StatusCode::INTERNAL_SERVER_ERROR, json!({"message": "boom"}));
        assert!(matches!(
            service(api).touch_last_login("u1").await,
            Err(DirectoryError::Status { status: StatusCode::INTERNAL_SERVER_ERROR, .. })
        ));
    }
}
