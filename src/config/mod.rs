use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub upstream: UpstreamConfig,
    pub security: SecurityConfig,
    pub oauth: OAuthConfig,
    pub api: ApiConfig,
    pub filter: FilterConfig,
    pub directory: DirectoryConfig,
    pub request_filter: RequestFilterConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(skip_serializing)]
    pub service_key: String,
    pub rest_prefix: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(skip_serializing)]
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_expiry_hours: u64,
    /// Secret of the data API's own token issuer; enables the database-issued validator.
    #[serde(skip_serializing)]
    pub database_jwt_secret: Option<String>,
    pub enable_database_login: bool,
    pub exempt_functions: Vec<String>,
    pub cors_origins: Vec<String>,
    pub policy_file: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthConfig {
    pub google_jwks_url: String,
    pub google_issuers: Vec<String>,
    pub jwks_cache_ttl_secs: u64,
    /// Upper bound on one signing-key download.
    pub jwks_fetch_timeout_secs: u64,
    pub provider_table: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub enable_rate_limiting: bool,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
    pub max_request_size_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub max_limit: Option<u64>,
    pub max_nested_depth: u32,
    pub debug_logging: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    pub users_table: String,
    pub verify_credentials_function: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFilterConfig {
    /// Entries of the form `METHOD /path`, e.g. `POST /proxy/delete`.
    pub blocked_routes: Vec<String>,
    pub allow_unfiltered_mutations: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    /// Whether a function name is allow-listed to bypass authentication.
    pub fn is_exempt_function(&self, name: &str) -> bool {
        self.security.exempt_functions.iter().any(|f| f == name)
    }

    fn with_env_overrides(mut self) -> Self {
        // Upstream
        if let Ok(v) = env::var("SUPABASE_URL") {
            self.upstream.base_url = v.trim_end_matches('/').to_string();
        }
        if let Ok(v) = env::var("SUPABASE_SERVICE_ROLE_KEY") {
            self.upstream.service_key = v;
        }
        if let Ok(v) = env::var("UPSTREAM_REST_PREFIX") {
            self.upstream.rest_prefix = v;
        }
        if let Ok(v) = env::var("UPSTREAM_TIMEOUT_SECS") {
            self.upstream.timeout_secs = v.parse().unwrap_or(self.upstream.timeout_secs);
        }

        // Security
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("JWT_ISSUER") {
            self.security.jwt_issuer = v;
        }
        if let Ok(v) = env::var("JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Ok(v) = env::var("SUPABASE_JWT_SECRET") {
            self.security.database_jwt_secret = Some(v).filter(|s| !s.is_empty());
        }
        if let Ok(v) = env::var("ENABLE_DATABASE_LOGIN") {
            self.security.enable_database_login = v.parse().unwrap_or(self.security.enable_database_login);
        }
        if let Ok(v) = env::var("EXEMPT_FUNCTIONS") {
            self.security.exempt_functions = split_list(&v);
        }
        if let Ok(v) = env::var("CORS_ORIGINS") {
            self.security.cors_origins = split_list(&v);
        }
        if let Ok(v) = env::var("RBAC_POLICY_FILE") {
            self.security.policy_file = Some(v).filter(|s| !s.is_empty());
        }

        // OAuth
        if let Ok(v) = env::var("GOOGLE_JWKS_URL") {
            self.oauth.google_jwks_url = v;
        }
        if let Ok(v) = env::var("JWKS_CACHE_TTL_SECS") {
            self.oauth.jwks_cache_ttl_secs = v.parse().unwrap_or(self.oauth.jwks_cache_ttl_secs);
        }
        if let Ok(v) = env::var("JWKS_FETCH_TIMEOUT_SECS") {
            self.oauth.jwks_fetch_timeout_secs = v.parse().unwrap_or(self.oauth.jwks_fetch_timeout_secs);
        }
        if let Ok(v) = env::var("OAUTH_PROVIDER_TABLE") {
            self.oauth.provider_table = v;
        }

        // API overrides
        if let Ok(v) = env::var("API_ENABLE_RATE_LIMITING") {
            self.api.enable_rate_limiting = v.parse().unwrap_or(self.api.enable_rate_limiting);
        }
        if let Ok(v) = env::var("API_RATE_LIMIT_REQUESTS") {
            self.api.rate_limit_requests = v.parse().unwrap_or(self.api.rate_limit_requests);
        }
        if let Ok(v) = env::var("API_RATE_LIMIT_WINDOW_SECS") {
            self.api.rate_limit_window_secs = v.parse().unwrap_or(self.api.rate_limit_window_secs);
        }
        if let Ok(v) = env::var("API_MAX_REQUEST_SIZE_BYTES") {
            self.api.max_request_size_bytes = v.parse().unwrap_or(self.api.max_request_size_bytes);
        }

        // Filter overrides
        if let Ok(v) = env::var("FILTER_MAX_LIMIT") {
            self.filter.max_limit = v.parse().ok();
        }
        if let Ok(v) = env::var("FILTER_MAX_NESTED_DEPTH") {
            self.filter.max_nested_depth = v.parse().unwrap_or(self.filter.max_nested_depth);
        }
        if let Ok(v) = env::var("FILTER_DEBUG_LOGGING") {
            self.filter.debug_logging = v.parse().unwrap_or(self.filter.debug_logging);
        }

        // Directory
        if let Ok(v) = env::var("USERS_TABLE") {
            self.directory.users_table = v;
        }
        if let Ok(v) = env::var("VERIFY_CREDENTIALS_FUNCTION") {
            self.directory.verify_credentials_function = v;
        }

        // Request filter
        if let Ok(v) = env::var("BLOCKED_ROUTES") {
            self.request_filter.blocked_routes = split_list(&v);
        }

        self
    }

    fn development() -> Self {
        Self {
            environment: Environment::Development,
            upstream: UpstreamConfig::default(),
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_issuer: "compliance-proxy".to_string(),
                jwt_expiry_hours: 24 * 7, // 1 week
                database_jwt_secret: None,
                enable_database_login: true,
                exempt_functions: vec![],
                cors_origins: vec!["http://localhost:3000".to_string(), "http://localhost:5173".to_string()],
                policy_file: None,
            },
            oauth: OAuthConfig::default(),
            api: ApiConfig {
                enable_rate_limiting: false,
                rate_limit_requests: 1000,
                rate_limit_window_secs: 60,
                max_request_size_bytes: 10 * 1024 * 1024, // 10MB
            },
            filter: FilterConfig {
                max_limit: Some(1000),
                max_nested_depth: 10,
                debug_logging: true,
            },
            directory: DirectoryConfig::default(),
            request_filter: RequestFilterConfig {
                blocked_routes: vec![],
                allow_unfiltered_mutations: false,
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            upstream: UpstreamConfig::default(),
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_issuer: "compliance-proxy".to_string(),
                jwt_expiry_hours: 24,
                database_jwt_secret: None,
                enable_database_login: true,
                exempt_functions: vec![],
                cors_origins: vec!["https://staging.example.com".to_string()],
                policy_file: None,
            },
            oauth: OAuthConfig::default(),
            api: ApiConfig {
                enable_rate_limiting: true,
                rate_limit_requests: 100,
                rate_limit_window_secs: 60,
                max_request_size_bytes: 5 * 1024 * 1024, // 5MB
            },
            filter: FilterConfig {
                max_limit: Some(500),
                max_nested_depth: 5,
                debug_logging: false,
            },
            directory: DirectoryConfig::default(),
            request_filter: RequestFilterConfig {
                blocked_routes: vec![],
                allow_unfiltered_mutations: false,
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            upstream: UpstreamConfig::default(),
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_issuer: "compliance-proxy".to_string(),
                jwt_expiry_hours: 8,
                database_jwt_secret: None,
                enable_database_login: false,
                exempt_functions: vec![],
                cors_origins: vec!["https://app.example.com".to_string()],
                policy_file: None,
            },
            oauth: OAuthConfig::default(),
            api: ApiConfig {
                enable_rate_limiting: true,
                rate_limit_requests: 100,
                rate_limit_window_secs: 60,
                max_request_size_bytes: 2 * 1024 * 1024, // 2MB
            },
            filter: FilterConfig {
                max_limit: Some(1000),
                max_nested_depth: 3,
                debug_logging: false,
            },
            directory: DirectoryConfig::default(),
            request_filter: RequestFilterConfig {
                blocked_routes: vec![],
                allow_unfiltered_mutations: false,
            },
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            service_key: String::new(),
            rest_prefix: "/rest/v1".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            google_jwks_url: "https://www.googleapis.com/oauth2/v3/certs".to_string(),
            google_issuers: vec![
                "accounts.google.com".to_string(),
                "https://accounts.google.com".to_string(),
            ],
            jwks_cache_ttl_secs: 24 * 60 * 60,
            jwks_fetch_timeout_secs: 10,
            provider_table: "auth_providers".to_string(),
        }
    }
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            users_table: "users".to_string(),
            verify_credentials_function: "verify_user_credentials".to_string(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::development()
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}
