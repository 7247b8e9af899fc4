use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::services::distribution::{GlobalUpdateMode, Strategy};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_LOW_STOCK_THRESHOLD: i64 = 2;
const DEFAULT_BACKFILL_BATCH_SIZE: u64 = 500;
const DEFAULT_BACKFILL_LOCK_TTL_SECS: u64 = 300;
const DEFAULT_GLOBAL_UPDATE_TIMEOUT_SECS: u64 = 30;

/// How external "set total quantity" updates are distributed across locations.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DistributionConfig {
    #[serde(default = "default_strategy")]
    #[validate(custom = "validate_strategy")]
    pub strategy: String,

    /// Location receiving default-location updates (usually a distribution center)
    #[serde(default)]
    pub default_location_id: Option<i64>,

    /// Spill reductions the default location cannot absorb onto other locations
    #[serde(default)]
    pub negative_fallback: bool,

    /// Per-location weights (location id -> weight) used when nothing is in stock
    #[serde(default)]
    pub weights: HashMap<String, u32>,

    /// Whether global updates are applied, silently ignored or rejected
    #[serde(default = "default_global_updates")]
    #[validate(custom = "validate_global_updates")]
    pub global_updates: String,

    #[serde(default = "default_global_update_timeout_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub timeout_secs: u64,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            strategy: default_strategy(),
            default_location_id: None,
            negative_fallback: false,
            weights: HashMap::new(),
            global_updates: default_global_updates(),
            timeout_secs: default_global_update_timeout_secs(),
        }
    }
}

/// How order lifecycle events are mapped to a fulfilling location.
#[derive(Clone, Debug, Default, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OrderSyncConfig {
    /// Used for delivery orders whose shipping method has no explicit mapping
    #[serde(default)]
    pub default_distribution_center_id: Option<i64>,

    /// Shipping method instance id -> location id
    #[serde(default)]
    pub shipping_method_locations: HashMap<String, i64>,
}

#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BackfillConfig {
    #[serde(default = "default_backfill_batch_size")]
    #[validate(range(min = 1, max = 10000))]
    pub batch_size: u64,

    /// Single-flight lock lifetime; a crashed scan frees the lock after this
    #[serde(default = "default_backfill_lock_ttl_secs")]
    #[validate(range(min = 10, max = 3600))]
    pub lock_ttl_secs: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            batch_size: default_backfill_batch_size(),
            lock_ttl_secs: default_backfill_lock_ttl_secs(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Request timeout for the HTTP layer (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,

    /// Threshold used when neither the stock row nor the item sets one
    #[serde(default = "default_low_stock_threshold")]
    #[validate(range(min = 0))]
    pub default_low_stock_threshold: i64,

    #[serde(default)]
    #[validate]
    pub distribution: DistributionConfig,

    #[serde(default)]
    #[validate]
    pub order_sync: OrderSyncConfig,

    #[serde(default)]
    #[validate]
    pub backfill: BackfillConfig,
}

impl AppConfig {
    /// Creates a configuration with defaults for everything but the essentials
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            default_low_stock_threshold: default_low_stock_threshold(),
            distribution: DistributionConfig::default(),
            order_sync: OrderSyncConfig::default(),
            backfill: BackfillConfig::default(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
        }

        if self
            .distribution
            .weights
            .keys()
            .any(|key| key.trim().parse::<i64>().is_err())
        {
            let mut err = ValidationError::new("distribution_weights");
            err.message = Some("distribution.weights keys must be numeric location ids".into());
            errors.add("distribution", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_request_timeout_secs() -> u64 {
    60
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_low_stock_threshold() -> i64 {
    DEFAULT_LOW_STOCK_THRESHOLD
}

fn default_strategy() -> String {
    Strategy::DefaultLocationOverwrite.to_string()
}

fn default_global_updates() -> String {
    GlobalUpdateMode::Apply.to_string()
}

fn default_global_update_timeout_secs() -> u64 {
    DEFAULT_GLOBAL_UPDATE_TIMEOUT_SECS
}

fn default_backfill_batch_size() -> u64 {
    DEFAULT_BACKFILL_BATCH_SIZE
}

fn default_backfill_lock_ttl_secs() -> u64 {
    DEFAULT_BACKFILL_LOCK_TTL_SECS
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_strategy(value: &str) -> Result<(), ValidationError> {
    if value.parse::<Strategy>().is_ok() {
        Ok(())
    } else {
        let mut err = ValidationError::new("strategy");
        err.message = Some(
            "Must be one of: default_location_overwrite, default_location_delta, proportional, overwrite_all"
                .into(),
        );
        Err(err)
    }
}

fn validate_global_updates(value: &str) -> Result<(), ValidationError> {
    if value.parse::<GlobalUpdateMode>().is_ok() {
        Ok(())
    } else {
        let mut err = ValidationError::new("global_updates");
        err.message = Some("Must be one of: apply, ignore, reject".into());
        Err(err)
    }
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("stockledger_api={},tower_http=info", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://stockledger.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
