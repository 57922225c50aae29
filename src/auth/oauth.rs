use chrono::Utc;
use jsonwebtoken::{decode, decode_header, Validation};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use super::{is_hmac, AuthError, JwksCache, Principal, TrustSource};
use crate::services::ProviderService;

pub const GOOGLE_PROVIDER: &str = "google";

#[derive(Debug, Deserialize)]
struct GoogleClaims {
    sub: Option<String>,
    email: Option<String>,
    /// Google has emitted this both as a bool and as a string.
    email_verified: Option<Value>,
    name: Option<String>,
    exp: Option<i64>,
}

/// Verifies Google-issued ID tokens against the published signing keys.
///
/// The expected audience is the OAuth client id stored in the provider
/// configuration table, read on every verification so rotation needs no restart.
pub struct GoogleVerifier {
    jwks: Arc<JwksCache>,
    providers: ProviderService,
    issuers: Vec<String>,
}

impl GoogleVerifier {
    pub fn new(jwks: Arc<JwksCache>, providers: ProviderService, issuers: Vec<String>) -> Self {
        Self { jwks, providers, issuers }
    }

    pub async fn verify(&self, id_token: &str) -> Result<Principal, AuthError> {
        let header = decode_header(id_token).map_err(AuthError::from_jwt)?;
        // Shared-secret tokens can never come from an external provider
        if is_hmac(header.alg) {
            return Err(AuthError::Verification(format!("{:?} is not an identity provider algorithm", header.alg)));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::Malformed("token header has no key id".to_string()))?;

        let (key, algorithm) = self.jwks.decoding_key(&kid).await?;
        if header.alg != algorithm {
            return Err(AuthError::Verification(format!(
                "token algorithm {:?} does not match key algorithm {:?}",
                header.alg, algorithm
            )));
        }

        let client_id = self
            .providers
            .client_id(GOOGLE_PROVIDER)
            .await
            .map_err(|e| AuthError::ProviderConfig(e.to_string()))?
            .ok_or_else(|| AuthError::ProviderConfig("no client id registered for google".to_string()))?;

        let mut validation = Validation::new(algorithm);
        validation.set_audience(&[client_id]);
        validation.set_issuer(self.issuers.as_slice());
        validation.set_required_spec_claims(&["exp", "sub", "aud", "iss"]);

        let claims = decode::<GoogleClaims>(id_token, &key, &validation)
            .map_err(AuthError::from_jwt)?
            .claims;

        // The library allows clock leeway; expiry itself is not negotiable
        let exp = claims.exp.ok_or(AuthError::MissingClaim("exp"))?;
        if exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }

        let sub = claims.sub.filter(|s| !s.is_empty()).ok_or(AuthError::MissingClaim("sub"))?;
        let email = claims.email.filter(|s| !s.is_empty()).ok_or(AuthError::MissingClaim("email"))?;

        let verified = match &claims.email_verified {
            None => true,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            Some(_) => false,
        };
        if !verified {
            return Err(AuthError::Verification("email address is not verified".to_string()));
        }

        Ok(Principal {
            id: sub,
            email: Some(email.to_lowercase()),
            name: claims.name,
            source: TrustSource::Google,
            role: None,
            exempted: false,
        })
    }
}
