use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use tracing::info;
use validator::Validate;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Application configuration, layered from files and `GROCERLY_` environment
/// variables, validated at load time.
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Database connection URL (Postgres in production, SQLite in tests)
    pub database_url: String,

    /// HMAC secret for bearer-token verification (32+ chars)
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON-formatted logs (production deployments)
    #[serde(default)]
    pub log_json: bool,

    /// Run pending migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// Per-request timeout applied at the router layer
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Debounce window for the cart stock monitor, coalescing bursts of
    /// product updates before re-fetching
    #[serde(default = "default_stock_debounce_ms")]
    pub stock_debounce_ms: u64,

    /// TTL for cached trending results
    #[serde(default = "default_trending_cache_ttl_secs")]
    pub trending_cache_ttl_secs: u64,

    /// Minimum delivered order items in the lookback window before the
    /// trending computation trusts its data (else widen / fall back)
    #[serde(default = "default_min_trending_samples")]
    pub min_trending_samples: usize,

    /// Minimum candidates a related-products layer must yield before the
    /// fallback chain stops
    #[serde(default = "default_min_related_results")]
    pub min_related_results: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
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
fn default_db_max_connections() -> u32 {
    10
}
fn default_db_min_connections() -> u32 {
    1
}
fn default_request_timeout_secs() -> u64 {
    10
}
fn default_stock_debounce_ms() -> u64 {
    300
}
fn default_trending_cache_ttl_secs() -> u64 {
    300
}
fn default_min_trending_samples() -> usize {
    10
}
fn default_min_related_results() -> usize {
    2
}

impl AppConfig {
    /// Construct a configuration directly; used by tests and embedding code.
    pub fn new(database_url: String, jwt_secret: String, host: String, port: u16) -> Self {
        Self {
            database_url,
            jwt_secret,
            host,
            port,
            environment: "test".to_string(),
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            request_timeout_secs: default_request_timeout_secs(),
            stock_debounce_ms: default_stock_debounce_ms(),
            trending_cache_ttl_secs: default_trending_cache_ttl_secs(),
            min_trending_samples: default_min_trending_samples(),
            min_related_results: default_min_related_results(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

/// Load configuration from `config/default`, `config/{environment}` and
/// `GROCERLY_`-prefixed environment variables, later sources overriding
/// earlier ones.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let environment =
        std::env::var("GROCERLY_ENVIRONMENT").unwrap_or_else(|_| DEFAULT_ENV.to_string());

    let builder = Config::builder()
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, environment)).required(false))
        .add_source(Environment::with_prefix("GROCERLY").separator("__"));

    let cfg: AppConfig = builder.build()?.try_deserialize()?;

    cfg.validate()
        .map_err(|e| ConfigError::Message(format!("invalid configuration: {}", e)))?;

    info!(
        environment = %environment,
        host = %cfg.host,
        port = cfg.port,
        "configuration loaded"
    );

    Ok(cfg)
}

/// Initialize the global tracing subscriber. `RUST_LOG` overrides the
/// configured level when set.
pub fn init_tracing(log_level: &str, json: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("grocerly_api={0},tower_http={0}", log_level)));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}
