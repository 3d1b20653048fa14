use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_ORDER_CODE_ATTEMPTS: u32 = 3;
const DEV_DEFAULT_JWT_SECRET: &str = "development_only_storefront_secret_change_me_in_any_shared_env";

/// VNPay merchant settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct VnPayConfig {
    /// Terminal (merchant) code issued by VNPay
    pub tmn_code: String,

    /// Shared secret used for HMAC-SHA512 signatures
    pub hash_secret: String,

    #[serde(default = "default_vnpay_payment_url")]
    #[validate(url)]
    pub payment_url: String,

    /// Where VNPay sends the shopper's browser after payment
    #[validate(url)]
    pub return_url: String,
}

impl Default for VnPayConfig {
    fn default() -> Self {
        Self {
            tmn_code: String::new(),
            hash_secret: String::new(),
            payment_url: default_vnpay_payment_url(),
            return_url: "http://localhost:8080/api/v1/payments/vnpay/return".to_string(),
        }
    }
}

/// MoMo merchant settings
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct MoMoConfig {
    pub partner_code: String,
    pub access_key: String,

    /// Shared secret used for HMAC-SHA256 signatures
    pub secret_key: String,

    /// MoMo create-payment endpoint
    #[serde(default = "default_momo_endpoint")]
    #[validate(url)]
    pub endpoint: String,

    /// Server-to-server notification target
    #[validate(url)]
    pub ipn_url: String,

    #[validate(url)]
    pub redirect_url: String,
}

impl Default for MoMoConfig {
    fn default() -> Self {
        Self {
            partner_code: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            endpoint: default_momo_endpoint(),
            ipn_url: "http://localhost:8080/api/v1/payments/momo/ipn".to_string(),
            redirect_url: "http://localhost:8080/api/v1/payments/momo/return".to_string(),
        }
    }
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Secret for verifying HS256 bearer tokens
    #[validate(length(min = 32))]
    pub jwt_secret: String,

    /// Server host address
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    #[serde(default)]
    pub cors_allow_any_origin: bool,

    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Flat shipping fee added to every order (VND)
    #[serde(default = "default_shipping_fee")]
    #[validate(custom = "validate_shipping_fee")]
    pub shipping_fee: Decimal,

    /// How many order codes to try before giving up on a collision
    #[serde(default = "default_order_code_attempts")]
    #[validate(range(min = 1, max = 10))]
    pub order_code_max_attempts: u32,

    /// Storefront origin used for post-payment browser redirects
    #[serde(default = "default_frontend_url")]
    #[validate(url)]
    pub frontend_url: String,

    /// Timeout for outbound calls to payment gateways (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,

    #[serde(default)]
    #[validate]
    pub vnpay: VnPayConfig,

    #[serde(default)]
    #[validate]
    pub momo: MoMoConfig,
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

impl AppConfig {
    /// Builds a configuration with defaults for everything but the essentials.
    pub fn new(database_url: String, jwt_secret: String, environment: String) -> Self {
        Self {
            database_url,
            jwt_secret,
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            shipping_fee: default_shipping_fee(),
            order_code_max_attempts: DEFAULT_ORDER_CODE_ATTEMPTS,
            frontend_url: default_frontend_url(),
            gateway_timeout_secs: default_gateway_timeout_secs(),
            vnpay: VnPayConfig::default(),
            momo: MoMoConfig::default(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_deref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    pub fn should_allow_permissive_cors(&self) -> bool {
        self.cors_allow_any_origin || self.is_development()
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !self.is_development() && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if self.is_production() && self.vnpay.hash_secret.trim().is_empty() {
            let mut err = ValidationError::new("vnpay_hash_secret_required");
            err.message = Some("Set APP__VNPAY__HASH_SECRET in production".into());
            errors.add("vnpay", err);
        }

        if self.is_production() && self.momo.secret_key.trim().is_empty() {
            let mut err = ValidationError::new("momo_secret_key_required");
            err.message = Some("Set APP__MOMO__SECRET_KEY in production".into());
            errors.add("momo", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
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

fn default_shipping_fee() -> Decimal {
    dec!(30000)
}

fn default_order_code_attempts() -> u32 {
    DEFAULT_ORDER_CODE_ATTEMPTS
}

fn default_frontend_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_gateway_timeout_secs() -> u64 {
    15
}

fn default_vnpay_payment_url() -> String {
    "https://sandbox.vnpayment.vn/paymentv2/vpcpay.html".to_string()
}

fn default_momo_endpoint() -> String {
    "https://test-payment.momo.vn/v2/gateway/api/create".to_string()
}

/// Validates log level values
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

fn validate_shipping_fee(fee: &Decimal) -> Result<(), ValidationError> {
    if fee.is_sign_negative() {
        let mut err = ValidationError::new("shipping_fee");
        err.message = Some("shipping_fee must not be negative".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    let filter = EnvFilter::new(filter_directive);
    if json {
        let _ = fmt().with_env_filter(filter).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*), nested with `__` (e.g. APP__VNPAY__HASH_SECRET)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// Same layering as [`load_config`], reading TOML files from `config_dir`.
pub fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::from(config_dir.join("default.toml")).required(false))
        .add_source(File::from(config_dir.join(format!("{}.toml", run_env))).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET (minimum 32 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
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
            "a_sufficiently_long_secret_for_tests_0123456789".into(),
            "production".into(),
        )
    }

    #[test]
    fn defaults_match_checkout_policy() {
        let cfg = base_config();
        assert_eq!(cfg.shipping_fee, dec!(30000));
        assert_eq!(cfg.order_code_max_attempts, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn production_requires_cors_origins_and_gateway_secrets() {
        let cfg = base_config();
        let errors = cfg.validate_additional_constraints().unwrap_err();
        let fields = errors.errors();
        assert!(fields.contains_key("cors_allowed_origins"));
        assert!(fields.contains_key("vnpay"));
        assert!(fields.contains_key("momo"));
    }

    #[test]
    fn production_with_origins_and_secrets_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://shop.example.vn".into());
        cfg.vnpay.hash_secret = "vnp-secret".into();
        cfg.momo.secret_key = "momo-secret".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn development_allows_permissive_cors() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        cfg.jwt_secret = DEV_DEFAULT_JWT_SECRET.into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn negative_shipping_fee_is_rejected() {
        let mut cfg = base_config();
        cfg.shipping_fee = dec!(-1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn environment_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("default.toml"),
            "shipping_fee = \"30000\"\nfrontend_url = \"https://shop.example\"\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("staging.toml"),
            "jwt_secret = \"staging_secret_with_enough_characters_0123\"\nshipping_fee = \"25000\"\nport = 9090\ncors_allowed_origins = \"https://shop.example\"\n",
        )
        .unwrap();

        let cfg = load_config_from(dir.path(), "staging").unwrap();
        assert_eq!(cfg.environment, "staging");
        assert_eq!(cfg.shipping_fee, dec!(25000));
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.frontend_url, "https://shop.example");
    }

    #[test]
    fn missing_jwt_secret_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config_from(dir.path(), "staging");
        assert!(matches!(result, Err(AppConfigError::Load(_))));
    }
}
