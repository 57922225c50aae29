use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::AuthError;

/// Source of an identity provider's published signing keys.
#[async_trait]
pub trait KeyFetcher: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet, AuthError>;
}

/// Fetches a JWKS document over HTTPS.
pub struct HttpKeyFetcher {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpKeyFetcher {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self { client, url: url.into(), timeout }
    }
}

#[async_trait]
impl KeyFetcher for HttpKeyFetcher {
    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::KeyFetch(format!("{} returned {}", self.url, response.status())));
        }

        response.json::<JwkSet>().await.map_err(|e| AuthError::KeyFetch(e.to_string()))
    }
}

struct CachedKeys {
    keys: Arc<JwkSet>,
    fetched_at: Instant,
}

/// Process-wide signing key cache with a fixed time-to-live.
///
/// Reads share the lock; only an expired or empty cache takes the write lock,
/// and holds it for at most `fetch_timeout`. There is no invalidation other
/// than expiry.
pub struct JwksCache {
    fetcher: Arc<dyn KeyFetcher>,
    ttl: Duration,
    fetch_timeout: Duration,
    state: RwLock<Option<CachedKeys>>,
}

impl JwksCache {
    pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(fetcher: Arc<dyn KeyFetcher>, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            fetch_timeout: Self::DEFAULT_FETCH_TIMEOUT,
            state: RwLock::new(None),
        }
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub async fn keys(&self) -> Result<Arc<JwkSet>, AuthError> {
        // Fast path: try read lock
        {
            let state = self.state.read().await;
            if let Some(cached) = state.as_ref() {
                if cached.fetched_at.elapsed() < self.ttl {
                    return Ok(cached.keys.clone());
                }
            }
        }

        let mut state = self.state.write().await;
        // Another request may have refreshed while we waited
        if let Some(cached) = state.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.keys.clone());
            }
        }

        let keys = match tokio::time::timeout(self.fetch_timeout, self.fetcher.fetch()).await {
            Ok(fetched) => Arc::new(fetched?),
            Err(_) => {
                tracing::warn!("Signing key fetch timed out after {:?}", self.fetch_timeout);
                return Err(AuthError::KeyFetch(format!("timed out after {:?}", self.fetch_timeout)));
            }
        };
        tracing::info!("Fetched {} identity provider signing keys", keys.keys.len());
        *state = Some(CachedKeys { keys: keys.clone(), fetched_at: Instant::now() });
        Ok(keys)
    }

    /// Decoding key and algorithm for a key id.
    pub async fn decoding_key(&self, kid: &str) -> Result<(DecodingKey, Algorithm), AuthError> {
        let keys = self.keys().await?;
        let jwk = keys.find(kid).ok_or_else(|| AuthError::UnknownKey(kid.to_string()))?;
        let algorithm = key_algorithm(jwk)?;
        let key = DecodingKey::from_jwk(jwk).map_err(|e| AuthError::KeyFetch(e.to_string()))?;
        Ok((key, algorithm))
    }
}

fn key_algorithm(jwk: &Jwk) -> Result<Algorithm, AuthError> {
    match &jwk.common.key_algorithm {
        None | Some(KeyAlgorithm::RS256) => Ok(Algorithm::RS256),
        Some(KeyAlgorithm::RS384) => Ok(Algorithm::RS384),
        Some(KeyAlgorithm::RS512) => Ok(Algorithm::RS512),
        Some(other) => Err(AuthError::Verification(format!("unsupported key algorithm {:?}", other))),
    }
}
