use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";

/// Commerce pricing and fulfillment settings.
///
/// Monetary rates are declared as strings in TOML/env so they deserialize
/// through `Decimal` exactly; float representations would drift.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CommerceConfig {
    /// ISO currency for the storefront
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Flat tax rate applied to the discounted subtotal (e.g. 0.08)
    #[serde(default = "default_tax_rate")]
    pub tax_rate: Decimal,

    /// Orders at or above this subtotal ship free with the standard method
    #[serde(default = "default_free_shipping_threshold")]
    pub free_shipping_threshold: Decimal,

    /// Standard shipping quote below the free-shipping threshold
    #[serde(default = "default_flat_shipping_rate")]
    pub flat_shipping_rate: Decimal,

    /// Express shipping quote
    #[serde(default = "default_express_shipping_rate")]
    pub express_shipping_rate: Decimal,

    /// Overnight shipping quote
    #[serde(default = "default_overnight_shipping_rate")]
    pub overnight_shipping_rate: Decimal,

    /// Maximum allowed divergence between the cart's captured price and
    /// the catalog price at checkout before the order is rejected
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: Decimal,

    /// How long a checkout holds inventory before the sweep releases it
    #[serde(default = "default_reservation_ttl_secs")]
    pub reservation_ttl_secs: u64,

    /// Interval between reservation sweep runs
    #[serde(default = "default_reservation_sweep_interval_secs")]
    pub reservation_sweep_interval_secs: u64,
}

impl Default for CommerceConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            tax_rate: default_tax_rate(),
            free_shipping_threshold: default_free_shipping_threshold(),
            flat_shipping_rate: default_flat_shipping_rate(),
            express_shipping_rate: default_express_shipping_rate(),
            overnight_shipping_rate: default_overnight_shipping_rate(),
            price_tolerance: default_price_tolerance(),
            reservation_ttl_secs: default_reservation_ttl_secs(),
            reservation_sweep_interval_secs: default_reservation_sweep_interval_secs(),
        }
    }
}

/// Payment gateway connection settings.
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Base URL of the payment gateway API
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,

    /// Secret API key used as bearer auth against the gateway
    #[serde(default)]
    pub secret_key: String,

    /// Request timeout in seconds
    #[serde(default = "default_gateway_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_base_url(),
            secret_key: String::new(),
            timeout_secs: default_gateway_timeout_secs(),
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
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

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

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,

    /// Commerce pricing/fulfillment settings
    #[serde(default)]
    #[validate]
    pub commerce: CommerceConfig,

    /// Payment gateway settings
    #[serde(default)]
    #[validate]
    pub gateway: GatewayConfig,
}

impl AppConfig {
    /// Programmatic constructor used by tests and tooling.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            event_channel_capacity: default_event_channel_capacity(),
            commerce: CommerceConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationError> {
        if self.commerce.tax_rate < Decimal::ZERO || self.commerce.tax_rate >= Decimal::ONE {
            let mut err = ValidationError::new("tax_rate");
            err.message = Some("commerce.tax_rate must be in [0, 1)".into());
            return Err(err);
        }
        if self.commerce.price_tolerance < Decimal::ZERO {
            let mut err = ValidationError::new("price_tolerance");
            err.message = Some("commerce.price_tolerance must be non-negative".into());
            return Err(err);
        }
        if self.is_production() && self.gateway.secret_key.is_empty() {
            let mut err = ValidationError::new("gateway_secret");
            err.message = Some("gateway.secret_key is required in production".into());
            return Err(err);
        }
        Ok(())
    }
}

fn default_currency() -> String {
    "USD".to_string()
}
fn default_tax_rate() -> Decimal {
    dec!(0.08)
}
fn default_free_shipping_threshold() -> Decimal {
    dec!(100)
}
fn default_flat_shipping_rate() -> Decimal {
    dec!(10)
}
fn default_express_shipping_rate() -> Decimal {
    dec!(25)
}
fn default_overnight_shipping_rate() -> Decimal {
    dec!(50)
}
fn default_price_tolerance() -> Decimal {
    dec!(0.01)
}
fn default_reservation_ttl_secs() -> u64 {
    1800
}
fn default_reservation_sweep_interval_secs() -> u64 {
    300
}
fn default_gateway_base_url() -> String {
    "https://api.stripe.com".to_string()
}
fn default_gateway_timeout_secs() -> u64 {
    30
}
fn default_port() -> u16 {
    DEFAULT_PORT
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
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}
fn default_event_channel_capacity() -> usize {
    1024
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("configuration load error: {0}")]
    Load(#[from] ConfigError),
    #[error("configuration validation error: {0:?}")]
    Validation(validator::ValidationErrors),
    #[error("configuration constraint error: {0:?}")]
    Constraint(ValidationError),
}

/// Initializes the tracing subscriber from the configured level.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("atelier_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration.
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config file (config/default.toml)
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
        .set_default("database_url", "sqlite://atelier.db?mode=rwc")?
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
        error!("Configuration constraint validation failed: {:?}", e);
        AppConfigError::Constraint(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "test".into(),
        )
    }

    #[test]
    fn defaults_are_exact_decimals() {
        let cfg = base_config();
        assert_eq!(cfg.commerce.tax_rate, dec!(0.08));
        assert_eq!(cfg.commerce.free_shipping_threshold, dec!(100));
        assert_eq!(cfg.commerce.flat_shipping_rate, dec!(10));
        assert_eq!(cfg.commerce.price_tolerance, dec!(0.01));
    }

    #[test]
    fn tax_rate_out_of_range_is_rejected() {
        let mut cfg = base_config();
        cfg.commerce.tax_rate = dec!(1.5);
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn production_requires_gateway_secret() {
        let mut cfg = base_config();
        cfg.environment = "production".into();
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.gateway.secret_key = "sk_live_abc".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn commerce_config_deserializes_decimal_strings() {
        let cfg: CommerceConfig = serde_json::from_value(serde_json::json!({
            "currency": "EUR",
            "tax_rate": "0.21",
            "free_shipping_threshold": "250",
        }))
        .expect("commerce config should deserialize");
        assert_eq!(cfg.currency, "EUR");
        assert_eq!(cfg.tax_rate, dec!(0.21));
        assert_eq!(cfg.free_shipping_threshold, dec!(250));
        assert_eq!(cfg.flat_shipping_rate, dec!(10));
    }
}
