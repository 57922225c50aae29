pub mod auth;
pub mod config;
pub mod error;
pub mod filter;
pub mod handlers;
pub mod middleware;
pub mod proxy;
pub mod rate_limit;
pub mod rbac;
pub mod request_filter;
pub mod services;
pub mod upstream;

#[cfg(test)]
pub(crate) mod testing;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{any, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

use auth::{CredentialChain, GoogleVerifier, HttpKeyFetcher, JwksCache, KeyFetcher, TokenIssuer};
use config::AppConfig;
use rate_limit::RateLimiter;
use rbac::AccessControl;
use request_filter::RequestFilter;
use services::{ProviderService, UserService};
use upstream::{DataApi, RestClient};

/// Everything a request handler may need, shared across requests.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub data_api: Arc<dyn DataApi>,
    pub credentials: Arc<CredentialChain>,
    pub google: Arc<GoogleVerifier>,
    pub tokens: Arc<TokenIssuer>,
    pub users: UserService,
    pub rate_limiter: Arc<RateLimiter>,
    pub access: Arc<AccessControl>,
    pub request_filter: Arc<RequestFilter>,
}

impl AppState {
    /// Production wiring: reqwest data API client and HTTPS key fetcher.
    pub fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("compliance-proxy/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(config.upstream.timeout_secs))
            .timeout(Duration::from_secs(config.upstream.timeout_secs))
            .build()?;
        let data_api: Arc<dyn DataApi> = Arc::new(RestClient::new(client.clone(), &config.upstream)?);
        let key_fetcher: Arc<dyn KeyFetcher> = Arc::new(HttpKeyFetcher::new(
            client,
            config.oauth.google_jwks_url.clone(),
            Duration::from_secs(config.oauth.jwks_fetch_timeout_secs),
        ));
        Self::build(config, data_api, key_fetcher)
    }

    /// Wire the state around a given data API and key source.
    pub fn build(
        config: AppConfig,
        data_api: Arc<dyn DataApi>,
        key_fetcher: Arc<dyn KeyFetcher>,
    ) -> anyhow::Result<Self> {
        if config.security.jwt_secret.is_empty() {
            tracing::warn!("JWT_SECRET is not set; first-party tokens can be neither issued nor accepted");
        }

        let jwks = Arc::new(
            JwksCache::new(key_fetcher, Duration::from_secs(config.oauth.jwks_cache_ttl_secs))
                .with_fetch_timeout(Duration::from_secs(config.oauth.jwks_fetch_timeout_secs)),
        );
        let providers = ProviderService::new(data_api.clone(), config.oauth.provider_table.clone());
        let google = Arc::new(GoogleVerifier::new(jwks, providers, config.oauth.google_issuers.clone()));
        let users = UserService::new(data_api.clone(), &config.directory);

        Ok(Self {
            credentials: Arc::new(CredentialChain::from_config(&config.security, google.clone())),
            tokens: Arc::new(TokenIssuer::new(&config.security)),
            rate_limiter: Arc::new(RateLimiter::from_config(&config.api)),
            access: Arc::new(AccessControl::from_config(&config.security, Some(users.clone()))?),
            request_filter: Arc::new(RequestFilter::from_config(&config.request_filter)),
            google,
            users,
            data_api,
            config: Arc::new(config),
        })
    }
}

/// The full router: public login, protected proxy, and the global layers.
pub fn app(state: AppState) -> Router {
    let public = Router::new().route("/auth/login", post(handlers::public::login).fallback(handlers::not_found));

    let protected = Router::new()
        .route("/proxy/:operation", any(handlers::protected::proxy))
        .fallback(handlers::not_found)
        .layer(from_fn_with_state(state.clone(), middleware::auth_middleware));

    public
        .merge(protected)
        .with_state(state.clone())
        // Innermost first: panics still get CORS headers and a request id
        .layer(from_fn(middleware::recover_middleware))
        .layer(from_fn_with_state(state, middleware::cors_middleware))
        .layer(from_fn(middleware::request_id_middleware))
        .layer(TraceLayer::new_for_http())
}
