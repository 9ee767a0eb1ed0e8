use serde::Deserialize;
use std::env;

use resole_catalog::ServiceOffering;
use resole_shared::{GeoPoint, PlatformSettings};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub geocoding: GeocodingConfig,
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub assignment: AssignmentConfig,
    /// Initial platform settings; admin writes supersede these at runtime.
    #[serde(default)]
    pub business_rules: PlatformSettings,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

/// No `url` means the in-memory store.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: None, max_connections: default_max_connections() }
    }
}

fn default_max_connections() -> u32 { 5 }

/// No `url` disables rate limiting.
#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: Option<String>,
    #[serde(default = "default_rate_limit")]
    pub rate_limit: i64,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            rate_limit: default_rate_limit(),
            window_seconds: default_window_seconds(),
        }
    }
}

fn default_rate_limit() -> i64 { 100 }
fn default_window_seconds() -> i64 { 60 }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GeocoderProvider {
    Nominatim,
    Static,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StaticPlace {
    pub address: String,
    pub lat: f64,
    pub lon: f64,
}

impl StaticPlace {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeocodingConfig {
    pub provider: GeocoderProvider,
    pub base_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Lookup table for the `static` provider.
    #[serde(default)]
    pub places: Vec<StaticPlace>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessorProvider {
    Stripe,
    Mock,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentsConfig {
    pub provider: ProcessorProvider,
    pub api_base: String,
    #[serde(default)]
    pub secret_key: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    #[serde(default = "default_payments_timeout")]
    pub timeout_ms: u64,
    /// Country of partner payout accounts.
    #[serde(default = "default_connect_country")]
    pub connect_country: String,
}

fn default_payments_timeout() -> u64 { 10_000 }

fn default_connect_country() -> String { "CH".to_string() }

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self { max_attempts: 5, interval_ms: 2000 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssignmentConfig {
    /// 0 disables the background sweep.
    pub sweep_interval_seconds: u64,
}

impl Default for AssignmentConfig {
    fn default() -> Self {
        Self { sweep_interval_seconds: 300 }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CatalogConfig {
    #[serde(default)]
    pub offerings: Vec<ServiceOffering>,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `RESOLE_DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("RESOLE").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}
