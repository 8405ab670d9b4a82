use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use tracing::info;
use validator::Validate;

const DEFAULT_ENV: &str = "development";
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_ORIGIN: &str = "http://localhost:3000";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_WEBHOOK_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;
const DEFAULT_WEBHOOK_RETENTION_DAYS: i64 = 90;
const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 100;
const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 60;
const DEFAULT_RATE_LIMIT_CLEANUP_SECS: u64 = 300;

/// Application configuration with validation.
///
/// Loaded from `config/default.toml`, an optional environment-specific file
/// (`config/{environment}.toml`) and `APP__`-prefixed environment variables,
/// in that order of precedence.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL (postgres:// or sqlite://)
    pub database_url: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment (development/test/production)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level filter
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// JWT signing secret for Bearer-token validation
    #[validate(length(min = 32, message = "jwt_secret must be at least 32 characters"))]
    pub jwt_secret: String,

    /// JWT expiration in seconds
    #[serde(default = "default_jwt_expiration")]
    pub jwt_expiration: u64,

    /// Stripe secret key; checkout session creation is disabled when unset
    #[serde(default)]
    pub stripe_secret_key: Option<String>,

    /// Stripe API base URL (overridable for tests)
    #[serde(default = "default_stripe_api_base")]
    pub stripe_api_base: String,

    /// Shared secret for webhook signature verification
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,

    /// Maximum accepted webhook timestamp skew in seconds
    #[serde(default = "default_webhook_tolerance_secs")]
    pub webhook_tolerance_secs: u64,

    /// Maximum webhook payload size in bytes, enforced before JSON parsing
    #[serde(default = "default_webhook_max_payload_bytes")]
    pub webhook_max_payload_bytes: usize,

    /// Days to keep processed webhook event rows before the retention sweep
    #[serde(default = "default_webhook_retention_days")]
    pub webhook_retention_days: i64,

    /// Comma-separated list of origins allowed as checkout redirect targets
    #[serde(default)]
    pub checkout_allowed_origins: Option<String>,

    /// Origin substituted when the requested one is not on the allow-list
    #[serde(default = "default_origin")]
    pub default_origin: String,

    /// Global rate limit: requests per window
    #[serde(default = "default_rate_limit_requests")]
    pub rate_limit_requests: u32,

    /// Global rate limit: window length in seconds
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// Per-path overrides, comma-separated `path:limit:window_secs` specs
    #[serde(default)]
    pub rate_limit_path_policies: Option<String>,

    /// Interval for the expired-counter sweep
    #[serde(default = "default_rate_limit_cleanup_secs")]
    pub rate_limit_cleanup_interval_secs: u64,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
}

fn default_host() -> String {
    DEFAULT_HOST.to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
fn default_jwt_expiration() -> u64 {
    3600
}
fn default_stripe_api_base() -> String {
    DEFAULT_STRIPE_API_BASE.to_string()
}
fn default_origin() -> String {
    DEFAULT_ORIGIN.to_string()
}
fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}
fn default_webhook_max_payload_bytes() -> usize {
    DEFAULT_WEBHOOK_MAX_PAYLOAD_BYTES
}
fn default_webhook_retention_days() -> i64 {
    DEFAULT_WEBHOOK_RETENTION_DAYS
}
fn default_rate_limit_requests() -> u32 {
    DEFAULT_RATE_LIMIT_REQUESTS
}
fn default_rate_limit_window_secs() -> u64 {
    DEFAULT_RATE_LIMIT_WINDOW_SECS
}
fn default_rate_limit_cleanup_secs() -> u64 {
    DEFAULT_RATE_LIMIT_CLEANUP_SECS
}
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Origins accepted as checkout redirect targets, allow-list order kept.
    pub fn checkout_origins(&self) -> Vec<String> {
        self.checkout_allowed_origins
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Load configuration from files and environment.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment =
        std::env::var("APP__ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let mut builder = Config::builder();

    let default_path = Path::new(CONFIG_DIR).join("default.toml");
    builder = builder.add_source(File::from(default_path).required(false));

    let env_path = Path::new(CONFIG_DIR).join(format!("{environment}.toml"));
    builder = builder.add_source(File::from(env_path).required(false));

    builder = builder.add_source(Environment::with_prefix("APP").separator("__"));

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {e}")))?;

    info!(environment = %cfg.environment, "Configuration loaded");
    Ok(cfg)
}

/// Initialize the global tracing subscriber.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "sqlite::memory:".into(),
            host: default_host(),
            port: default_port(),
            environment: "test".into(),
            log_level: default_log_level(),
            log_json: false,
            jwt_secret: "test_secret_key_for_testing_purposes_only_32chars".into(),
            jwt_expiration: default_jwt_expiration(),
            stripe_secret_key: None,
            stripe_api_base: default_stripe_api_base(),
            stripe_webhook_secret: None,
            webhook_tolerance_secs: default_webhook_tolerance_secs(),
            webhook_max_payload_bytes: default_webhook_max_payload_bytes(),
            webhook_retention_days: default_webhook_retention_days(),
            checkout_allowed_origins: None,
            default_origin: default_origin(),
            rate_limit_requests: default_rate_limit_requests(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            rate_limit_path_policies: None,
            rate_limit_cleanup_interval_secs: default_rate_limit_cleanup_secs(),
            cors_allowed_origins: None,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
        }
    }

    #[test]
    fn short_jwt_secret_fails_validation() {
        let mut cfg = base_config();
        cfg.jwt_secret = "short".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn checkout_origins_parses_comma_list() {
        let mut cfg = base_config();
        cfg.checkout_allowed_origins =
            Some("https://maison.example, https://www.maison.example".into());
        assert_eq!(
            cfg.checkout_origins(),
            vec![
                "https://maison.example".to_string(),
                "https://www.maison.example".to_string()
            ]
        );
    }

    #[test]
    fn checkout_origins_empty_when_unset() {
        assert!(base_config().checkout_origins().is_empty());
    }
}
