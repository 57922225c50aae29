//! Credential handling: who is calling, and how we know.

pub mod jwks;
pub mod oauth;
pub mod validators;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::SecurityConfig;

pub use jwks::{HttpKeyFetcher, JwksCache, KeyFetcher};
pub use oauth::GoogleVerifier;
pub use validators::{CredentialChain, CredentialValidator, DatabaseTokenValidator, FirstPartyValidator};

/// Which trust source vouched for a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustSource {
    FirstParty,
    Google,
    Database,
    Anonymous,
}

impl TrustSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrustSource::FirstParty => "first_party",
            TrustSource::Google => "google",
            TrustSource::Database => "database",
            TrustSource::Anonymous => "anonymous",
        }
    }
}

/// Authenticated caller for the lifetime of one request
#[derive(Clone, Debug, Serialize)]
pub struct Principal {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub source: TrustSource,
    /// Role carried by the credential; resolved by RBAC when absent.
    pub role: Option<String>,
    pub exempted: bool,
}

impl Principal {
    /// Synthetic caller for allow-listed function invocations.
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".to_string(),
            email: None,
            name: None,
            source: TrustSource::Anonymous,
            role: None,
            exempted: true,
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.source == TrustSource::Anonymous
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("verification failed: {0}")]
    Verification(String),

    #[error("token expired")]
    Expired,

    #[error("token is missing required claim '{0}'")]
    MissingClaim(&'static str),

    #[error("no signing key with id '{0}'")]
    UnknownKey(String),

    #[error("signing key fetch failed: {0}")]
    KeyFetch(String),

    #[error("identity provider not configured: {0}")]
    ProviderConfig(String),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("token signing failed: {0}")]
    Signing(String),

    #[error("no validator accepted the token ({})", .0.join("; "))]
    Rejected(Vec<String>),
}

impl AuthError {
    pub(crate) fn from_jwt(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                AuthError::Malformed(err.to_string())
            }
            ErrorKind::MissingRequiredClaim(claim) => match claim.as_str() {
                "sub" => AuthError::MissingClaim("sub"),
                "exp" => AuthError::MissingClaim("exp"),
                _ => AuthError::Verification(err.to_string()),
            },
            _ => AuthError::Verification(err.to_string()),
        }
    }
}

/// Claims of tokens this service issues after a successful login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Login method that led to this token; informational only.
    pub provider: String,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
}

/// A freshly signed first-party token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: i64,
}

/// Signs first-party tokens with the shared secret.
#[derive(Clone)]
pub struct TokenIssuer {
    secret: String,
    issuer: String,
    expiry_hours: u64,
}

impl TokenIssuer {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            secret: config.jwt_secret.clone(),
            issuer: config.jwt_issuer.clone(),
            expiry_hours: config.jwt_expiry_hours,
        }
    }

    pub fn issue(
        &self,
        sub: &str,
        email: &str,
        name: Option<String>,
        role: Option<String>,
        provider: &str,
    ) -> Result<IssuedToken, AuthError> {
        if self.secret.is_empty() {
            return Err(AuthError::NotConfigured("JWT secret"));
        }

        let now = Utc::now();
        let expires_in = Duration::hours(self.expiry_hours as i64);
        let claims = Claims {
            sub: sub.to_string(),
            email: email.to_string(),
            name,
            role,
            provider: provider.to_string(),
            iss: self.issuer.clone(),
            exp: (now + expires_in).timestamp(),
            iat: now.timestamp(),
        };

        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
            .map_err(|e| AuthError::Signing(e.to_string()))?;

        Ok(IssuedToken { token, expires_in: expires_in.num_seconds() })
    }
}

#[derive(Deserialize)]
struct SubjectOnly {
    sub: Option<String>,
}

/// Read the `sub` claim without verifying anything. Only fit for bucketing.
pub fn peek_subject(token: &str) -> Option<String> {
    let header = decode_header(token).ok()?;
    let mut validation = Validation::new(header.alg);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    let data = decode::<SubjectOnly>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    data.claims.sub.filter(|s| !s.is_empty())
}

/// Short stable identifier for a token, safe to log.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().take(6).map(|b| format!("{:02x}", b)).collect()
}

/// Whether a token header names an HMAC algorithm.
pub(crate) fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}
