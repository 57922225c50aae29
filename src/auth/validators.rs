use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{token_fingerprint, AuthError, GoogleVerifier, Principal, TrustSource};
use crate::config::SecurityConfig;

/// Audience the data API stamps on tokens for signed-in users.
const DATABASE_AUDIENCE: &str = "authenticated";

#[derive(Debug, Deserialize)]
struct FirstPartyClaims {
    sub: Option<String>,
    email: Option<String>,
    name: Option<String>,
    role: Option<String>,
}

/// Tokens this service issued at login, signed with the shared secret.
#[derive(Clone)]
pub struct FirstPartyValidator {
    secret: String,
    issuer: String,
}

impl FirstPartyValidator {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            secret: config.jwt_secret.clone(),
            issuer: config.jwt_issuer.clone(),
        }
    }

    pub fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        if self.secret.is_empty() {
            return Err(AuthError::NotConfigured("JWT secret"));
        }
        let header = decode_header(token).map_err(AuthError::from_jwt)?;
        if header.alg != Algorithm::HS256 {
            return Err(AuthError::Verification(format!("unexpected algorithm {:?}", header.alg)));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<FirstPartyClaims>(token, &DecodingKey::from_secret(self.secret.as_bytes()), &validation)
            .map_err(AuthError::from_jwt)?
            .claims;

        Ok(Principal {
            id: claims.sub.filter(|s| !s.is_empty()).ok_or(AuthError::MissingClaim("sub"))?,
            email: Some(claims.email.filter(|s| !s.is_empty()).ok_or(AuthError::MissingClaim("email"))?),
            name: claims.name,
            source: TrustSource::FirstParty,
            role: claims.role,
            exempted: false,
        })
    }
}

#[derive(Debug, Deserialize)]
struct DatabaseClaims {
    sub: Option<String>,
    email: Option<String>,
    #[serde(default)]
    app_metadata: Value,
    #[serde(default)]
    user_metadata: Value,
}

/// Session tokens minted by the data API's own auth service.
#[derive(Clone)]
pub struct DatabaseTokenValidator {
    secret: Option<String>,
}

impl DatabaseTokenValidator {
    pub fn new(config: &SecurityConfig) -> Self {
        Self { secret: config.database_jwt_secret.clone() }
    }

    pub fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        let secret = self.secret.as_deref().ok_or(AuthError::NotConfigured("database token secret"))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[DATABASE_AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "sub"]);

        let claims = decode::<DatabaseClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
            .map_err(AuthError::from_jwt)?
            .claims;

        let name = ["full_name", "name"]
            .iter()
            .find_map(|key| claims.user_metadata.get(key).and_then(Value::as_str))
            .map(str::to_string);

        Ok(Principal {
            id: claims.sub.filter(|s| !s.is_empty()).ok_or(AuthError::MissingClaim("sub"))?,
            email: Some(claims.email.filter(|s| !s.is_empty()).ok_or(AuthError::MissingClaim("email"))?),
            name,
            source: TrustSource::Database,
            // the top-level `role` claim is the database role, not an application role
            role: claims.app_metadata.get("role").and_then(Value::as_str).map(str::to_string),
            exempted: false,
        })
    }
}

/// One trust source a bearer credential may come from.
pub enum CredentialValidator {
    FirstParty(FirstPartyValidator),
    ExternalOAuth(Arc<GoogleVerifier>),
    DatabaseIssued(DatabaseTokenValidator),
}

impl CredentialValidator {
    pub fn name(&self) -> &'static str {
        match self {
            CredentialValidator::FirstParty(_) => "first_party",
            CredentialValidator::ExternalOAuth(_) => "google",
            CredentialValidator::DatabaseIssued(_) => "database",
        }
    }

    pub async fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        match self {
            CredentialValidator::FirstParty(v) => v.validate(token),
            CredentialValidator::ExternalOAuth(v) => v.verify(token).await,
            CredentialValidator::DatabaseIssued(v) => v.validate(token),
        }
    }
}

/// Tries each trust source in order; the first one that accepts the token wins.
pub struct CredentialChain {
    validators: Vec<CredentialValidator>,
}

impl CredentialChain {
    pub fn new(validators: Vec<CredentialValidator>) -> Self {
        Self { validators }
    }

    /// Standard order: first-party, then Google, then database-issued when its secret is set.
    pub fn from_config(config: &SecurityConfig, google: Arc<GoogleVerifier>) -> Self {
        let mut validators = vec![
            CredentialValidator::FirstParty(FirstPartyValidator::new(config)),
            CredentialValidator::ExternalOAuth(google),
        ];
        if config.database_jwt_secret.is_some() {
            validators.push(CredentialValidator::DatabaseIssued(DatabaseTokenValidator::new(config)));
        }
        Self::new(validators)
    }

    pub async fn validate(&self, token: &str) -> Result<Principal, AuthError> {
        let fingerprint = token_fingerprint(token);
        let mut reasons = Vec::with_capacity(self.validators.len());

        for validator in &self.validators {
            match validator.validate(token).await {
                Ok(principal) => {
                    tracing::debug!(
                        "Bearer [REDACTED] ({}) accepted by {} validator for {}",
                        fingerprint,
                        validator.name(),
                        principal.id
                    );
                    return Ok(principal);
                }
                Err(e) => {
                    tracing::debug!("Bearer [REDACTED] ({}) rejected by {} validator: {}", fingerprint, validator.name(), e);
                    reasons.push(format!("{}: {}", validator.name(), e));
                }
            }
        }

        tracing::warn!("Bearer [REDACTED] ({}) rejected by every validator", fingerprint);
        Err(AuthError::Rejected(reasons))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{google_claims, google_verifier, sign_google_token, StubDataApi, GOOGLE_CLIENT_ID};
    use axum::http::StatusCode;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn security() -> SecurityConfig {
        let mut config = crate::config::AppConfig::default().security;
        config.jwt_secret = "first-party-secret".to_string();
        config.database_jwt_secret = Some("database-secret".to_string());
        config
    }

    fn hs256(claims: Value, secret: &str) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn first_party_claims() -> Value {
        json!({
            "sub": "u1",
            "email": "a@b.com",
            "role": "viewer",
            "iss": "compliance-proxy",
            "exp": Utc::now().timestamp() + 600,
        })
    }

    fn database_claims() -> Value {
        json!({
            "sub": "db-user",
            "email": "d@b.com",
            "aud": "authenticated",
            "role": "authenticated",
            "app_metadata": {"role": "compliance_officer"},
            "user_metadata": {"full_name": "Dee"},
            "exp": Utc::now().timestamp() + 600,
        })
    }

    fn chain(api: Arc<StubDataApi>) -> CredentialChain {
        CredentialChain::from_config(&security(), Arc::new(google_verifier(api)))
    }

    #[test]
    fn first_party_accepts_own_tokens() {
        let principal = FirstPartyValidator::new(&security())
            .validate(&hs256(first_party_claims(), "first-party-secret"))
            .unwrap();
        assert_eq!(principal.id, "u1");
        assert_eq!(principal.role.as_deref(), Some("viewer"));
        assert_eq!(principal.source, TrustSource::FirstParty);
    }

    #[test]
    fn first_party_requires_email() {
        let mut claims = first_party_claims();
        claims.as_object_mut().unwrap().remove("email");
        let result = FirstPartyValidator::new(&security()).validate(&hs256(claims, "first-party-secret"));
        assert!(matches!(result, Err(AuthError::MissingClaim("email"))));
    }

    #[test]
    fn first_party_rejects_foreign_issuer_and_expiry() {
        let validator = FirstPartyValidator::new(&security());
        let mut claims = first_party_claims();
        claims["iss"] = json!("elsewhere");
        assert!(validator.validate(&hs256(claims, "first-party-secret")).is_err());

        let mut claims = first_party_claims();
        claims["exp"] = json!(Utc::now().timestamp() - 3600);
        assert!(matches!(validator.validate(&hs256(claims, "first-party-secret")), Err(AuthError::Expired)));
    }

    #[test]
    fn database_token_carries_app_role() {
        let principal = DatabaseTokenValidator::new(&security())
            .validate(&hs256(database_claims(), "database-secret"))
            .unwrap();
        assert_eq!(principal.source, TrustSource::Database);
        assert_eq!(principal.role.as_deref(), Some("compliance_officer"));
        assert_eq!(principal.name.as_deref(), Some("Dee"));
    }

    #[test]
    fn database_token_needs_audience() {
        let mut claims = database_claims();
        claims["aud"] = json!("anon");
        assert!(DatabaseTokenValidator::new(&security()).validate(&hs256(claims, "database-secret")).is_err());
    }

    #[tokio::test]
    async fn chain_falls_through_to_database_validator() {
        let api = Arc::new(StubDataApi::new());
        let principal = chain(api.clone()).validate(&hs256(database_claims(), "database-secret")).await.unwrap();
        assert_eq!(principal.source, TrustSource::Database);
        // the Google validator bails on the algorithm before any lookup
        assert!(api.requests().is_empty());
    }

    #[tokio::test]
    async fn chain_accepts_google_tokens() {
        let api = Arc::new(StubDataApi::new());
        api.push_json(StatusCode::OK, json!([{ "client_id": GOOGLE_CLIENT_ID }]));
        let token = sign_google_token(&google_claims("g@b.com"));
        let principal = chain(api).validate(&token).await.unwrap();
        assert_eq!(principal.source, TrustSource::Google);
    }

    #[tokio::test]
    async fn chain_collects_every_reason() {
        let api = Arc::new(StubDataApi::new());
        let token = hs256(first_party_claims(), "wrong-secret");
        match chain(api).validate(&token).await {
            Err(AuthError::Rejected(reasons)) => {
                assert_eq!(reasons.len(), 3);
                assert!(reasons[0].starts_with("first_party"));
                assert!(reasons[1].starts_with("google"));
                assert!(reasons[2].starts_with("database"));
            }
            other => panic!("expected rejection, got {:?}", other.map(|p| p.id)),
        }
    }

    #[tokio::test]
    async fn database_validator_absent_without_secret() {
        let mut config = security();
        config.database_jwt_secret = None;
        let chain = CredentialChain::from_config(&config, Arc::new(google_verifier(Arc::new(StubDataApi::new()))));
        assert_eq!(chain.validators.len(), 2);
    }
}
