//! Configuration loading for orderbridge.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `ORDERBRIDGE_`, producing a typed [`AppConfig`]. Required remote-API
//! credentials fail fast at startup; optional values degrade gracefully
//! (no cron secret means the trigger endpoint is unauthenticated).

use std::{collections::BTreeMap, env, net::SocketAddr, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trendyol::{AuthStyle, FeedEndpoint};

/// Application configuration derived from `ORDERBRIDGE_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_api_bind_addr")]
    pub api_bind_addr: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Destination store personal access token.
    #[serde(default)]
    pub airtable_token: String,
    /// Destination store base identifier.
    #[serde(default)]
    pub airtable_base_id: String,
    #[serde(default = "default_airtable_api_base")]
    pub airtable_api_base: String,
    #[serde(default = "default_orders_table")]
    pub orders_table: String,
    #[serde(default = "default_customers_table")]
    pub customers_table: String,
    #[serde(default = "default_inventory_table")]
    pub inventory_table: String,
    /// Marketplace supplier id.
    #[serde(default)]
    pub trendyol_seller_id: String,
    #[serde(default)]
    pub trendyol_api_key: String,
    #[serde(default)]
    pub trendyol_api_secret: String,
    #[serde(default = "default_trendyol_api_base")]
    pub trendyol_api_base: String,
    /// Which listing endpoint family to fetch from.
    #[serde(default = "default_trendyol_feed")]
    pub trendyol_feed: FeedEndpoint,
    /// How feed credentials are attached per endpoint generation.
    #[serde(default = "default_trendyol_auth_style")]
    pub trendyol_auth_style: AuthStyle,
    /// Shared secret guarding the sync trigger; absent means unauthenticated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_secret: Option<String>,
    #[serde(default = "default_watermark_path")]
    pub watermark_path: String,
    /// Optional seed watermark (epoch ms) used until a pass persists one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermark_ms: Option<i64>,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Knobs of a single reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SyncConfig {
    /// Orders requested per feed page.
    #[serde(default = "default_sync_page_size")]
    pub page_size: u32,
    /// Upper bound on pages fetched per pass, guarding against a feed that
    /// paginates indefinitely.
    #[serde(default = "default_sync_max_pages")]
    pub max_pages: u32,
    /// Watermark fallback window when no watermark has been persisted yet.
    #[serde(default = "default_sync_lookback_hours")]
    pub lookback_hours: u64,
    /// Per-request timeout applied to every outbound store/feed call.
    #[serde(default = "default_sync_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// Constant written into the destination sales-channel field.
    #[serde(default = "default_sync_sales_channel")]
    pub sales_channel: String,
}

/// Background scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct SchedulerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_scheduler_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_scheduler_jitter_pct_min")]
    pub jitter_pct_min: f64,
    #[serde(default = "default_scheduler_jitter_pct_max")]
    pub jitter_pct_max: f64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            api_bind_addr: default_api_bind_addr(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            airtable_token: String::new(),
            airtable_base_id: String::new(),
            airtable_api_base: default_airtable_api_base(),
            orders_table: default_orders_table(),
            customers_table: default_customers_table(),
            inventory_table: default_inventory_table(),
            trendyol_seller_id: String::new(),
            trendyol_api_key: String::new(),
            trendyol_api_secret: String::new(),
            trendyol_api_base: default_trendyol_api_base(),
            trendyol_feed: default_trendyol_feed(),
            trendyol_auth_style: default_trendyol_auth_style(),
            cron_secret: None,
            watermark_path: default_watermark_path(),
            watermark_ms: None,
            sync: SyncConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: default_sync_page_size(),
            max_pages: default_sync_max_pages(),
            lookback_hours: default_sync_lookback_hours(),
            request_timeout_seconds: default_sync_request_timeout_seconds(),
            sales_channel: default_sync_sales_channel(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: default_scheduler_interval_seconds(),
            jitter_pct_min: default_scheduler_jitter_pct_min(),
            jitter_pct_max: default_scheduler_jitter_pct_max(),
        }
    }
}

impl AppConfig {
    /// Returns the configured bind address as a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.api_bind_addr.parse()
    }

    /// Returns a redacted JSON representation (secrets are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if !config.airtable_token.is_empty() {
            config.airtable_token = "[REDACTED]".to_string();
        }
        if !config.trendyol_api_key.is_empty() {
            config.trendyol_api_key = "[REDACTED]".to_string();
        }
        if !config.trendyol_api_secret.is_empty() {
            config.trendyol_api_secret = "[REDACTED]".to_string();
        }
        if config.cron_secret.is_some() {
            config.cron_secret = Some("[REDACTED]".to_string());
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error if required settings are missing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Remote credentials are mandatory everywhere except the test profile,
        // where wiremock doubles stand in for the real services.
        if self.profile != "test" {
            if self.airtable_token.is_empty() {
                return Err(ConfigError::MissingAirtableToken);
            }
            if self.airtable_base_id.is_empty() {
                return Err(ConfigError::MissingAirtableBaseId);
            }
            if self.trendyol_seller_id.is_empty() {
                return Err(ConfigError::MissingTrendyolSellerId);
            }
            if self.trendyol_api_key.is_empty() || self.trendyol_api_secret.is_empty() {
                return Err(ConfigError::MissingTrendyolCredentials);
            }
        }

        self.sync.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }
}

impl SyncConfig {
    /// Validate sync configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 || self.page_size > 200 {
            return Err(ConfigError::InvalidSyncPageSize {
                value: self.page_size,
            });
        }
        if self.max_pages == 0 || self.max_pages > 100 {
            return Err(ConfigError::InvalidSyncMaxPages {
                value: self.max_pages,
            });
        }
        if self.lookback_hours == 0 || self.lookback_hours > 720 {
            return Err(ConfigError::InvalidSyncLookback {
                value: self.lookback_hours,
            });
        }
        if self.request_timeout_seconds == 0 || self.request_timeout_seconds > 120 {
            return Err(ConfigError::InvalidSyncRequestTimeout {
                value: self.request_timeout_seconds,
            });
        }
        Ok(())
    }
}

impl SchedulerConfig {
    /// Validate scheduler configuration bounds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.interval_seconds < 60 {
            return Err(ConfigError::InvalidSchedulerInterval {
                value: self.interval_seconds,
            });
        }
        if !(0.0..=1.0).contains(&self.jitter_pct_min) || !(0.0..=1.0).contains(&self.jitter_pct_max)
        {
            return Err(ConfigError::InvalidSchedulerJitterRange {
                min: self.jitter_pct_min,
                max: self.jitter_pct_max,
            });
        }
        if self.jitter_pct_min > self.jitter_pct_max {
            return Err(ConfigError::InvalidSchedulerJitterRange {
                min: self.jitter_pct_min,
                max: self.jitter_pct_max,
            });
        }
        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_api_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_airtable_api_base() -> String {
    "https://api.airtable.com/v0".to_string()
}

fn default_orders_table() -> String {
    "Orders".to_string()
}

fn default_customers_table() -> String {
    "Customers".to_string()
}

fn default_inventory_table() -> String {
    "French Inventories".to_string()
}

fn default_trendyol_api_base() -> String {
    "https://api.trendyol.com/sapigw".to_string()
}

fn default_trendyol_feed() -> FeedEndpoint {
    FeedEndpoint::Orders
}

fn default_trendyol_auth_style() -> AuthStyle {
    AuthStyle::Basic
}

fn default_watermark_path() -> String {
    "orderbridge-watermark.json".to_string()
}

fn default_sync_page_size() -> u32 {
    50
}

fn default_sync_max_pages() -> u32 {
    20
}

fn default_sync_lookback_hours() -> u64 {
    24
}

fn default_sync_request_timeout_seconds() -> u64 {
    15
}

fn default_sync_sales_channel() -> String {
    "Trendyol".to_string()
}

fn default_scheduler_interval_seconds() -> u64 {
    900
}

fn default_scheduler_jitter_pct_min() -> f64 {
    0.0
}

fn default_scheduler_jitter_pct_max() -> f64 {
    0.2
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("invalid api bind address '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("Airtable token is missing; set ORDERBRIDGE_AIRTABLE_TOKEN")]
    MissingAirtableToken,
    #[error("Airtable base id is missing; set ORDERBRIDGE_AIRTABLE_BASE_ID")]
    MissingAirtableBaseId,
    #[error("Trendyol seller id is missing; set ORDERBRIDGE_TRENDYOL_SELLER_ID")]
    MissingTrendyolSellerId,
    #[error(
        "Trendyol credentials are missing; set ORDERBRIDGE_TRENDYOL_API_KEY and ORDERBRIDGE_TRENDYOL_API_SECRET"
    )]
    MissingTrendyolCredentials,
    #[error("unknown feed endpoint '{value}'; expected 'orders' or 'shipment-packages'")]
    InvalidFeedEndpoint { value: String },
    #[error("unknown feed auth style '{value}'; expected 'basic' or 'headers'")]
    InvalidAuthStyle { value: String },
    #[error("sync page size must be between 1 and 200, got {value}")]
    InvalidSyncPageSize { value: u32 },
    #[error("sync max pages must be between 1 and 100, got {value}")]
    InvalidSyncMaxPages { value: u32 },
    #[error("sync lookback must be between 1 and 720 hours, got {value}")]
    InvalidSyncLookback { value: u64 },
    #[error("sync request timeout must be between 1 and 120 seconds, got {value}")]
    InvalidSyncRequestTimeout { value: u64 },
    #[error("scheduler interval must be at least 60 seconds when enabled, got {value}")]
    InvalidSchedulerInterval { value: u64 },
    #[error("scheduler jitter percentages are out of bounds (min: {min}, max: {max})")]
    InvalidSchedulerJitterRange { min: f64, max: f64 },
}

/// Loads configuration using layered `.env` files and `ORDERBRIDGE_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration from layered env files and process environment.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix("ORDERBRIDGE_") {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);
        let api_bind_addr = layered
            .remove("API_BIND_ADDR")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_api_bind_addr);
        let log_level = layered
            .remove("LOG_LEVEL")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_level);
        let log_format = layered
            .remove("LOG_FORMAT")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_log_format);

        let airtable_token = layered.remove("AIRTABLE_TOKEN").unwrap_or_default();
        let airtable_base_id = layered.remove("AIRTABLE_BASE_ID").unwrap_or_default();
        let airtable_api_base = layered
            .remove("AIRTABLE_API_BASE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_airtable_api_base);
        let orders_table = layered
            .remove("ORDERS_TABLE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_orders_table);
        let customers_table = layered
            .remove("CUSTOMERS_TABLE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_customers_table);
        let inventory_table = layered
            .remove("INVENTORY_TABLE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_inventory_table);

        let trendyol_seller_id = layered.remove("TRENDYOL_SELLER_ID").unwrap_or_default();
        let trendyol_api_key = layered.remove("TRENDYOL_API_KEY").unwrap_or_default();
        let trendyol_api_secret = layered.remove("TRENDYOL_API_SECRET").unwrap_or_default();
        let trendyol_api_base = layered
            .remove("TRENDYOL_API_BASE")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_trendyol_api_base);

        let trendyol_feed = match layered.remove("TRENDYOL_FEED").as_deref() {
            None | Some("") | Some("orders") => FeedEndpoint::Orders,
            Some("shipment-packages") => FeedEndpoint::ShipmentPackages,
            Some(other) => {
                return Err(ConfigError::InvalidFeedEndpoint {
                    value: other.to_string(),
                });
            }
        };
        let trendyol_auth_style = match layered.remove("TRENDYOL_AUTH_STYLE").as_deref() {
            None | Some("") | Some("basic") => AuthStyle::Basic,
            Some("headers") => AuthStyle::Headers,
            Some(other) => {
                return Err(ConfigError::InvalidAuthStyle {
                    value: other.to_string(),
                });
            }
        };

        let cron_secret = layered
            .remove("CRON_SECRET")
            .filter(|v| !v.trim().is_empty());
        let watermark_path = layered
            .remove("WATERMARK_PATH")
            .filter(|v| !v.is_empty())
            .unwrap_or_else(default_watermark_path);
        let watermark_ms = layered
            .remove("WATERMARK_MS")
            .and_then(|v| v.parse().ok());

        let sync = SyncConfig {
            page_size: layered
                .remove("SYNC_PAGE_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_sync_page_size),
            max_pages: layered
                .remove("SYNC_MAX_PAGES")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_sync_max_pages),
            lookback_hours: layered
                .remove("SYNC_LOOKBACK_HOURS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_sync_lookback_hours),
            request_timeout_seconds: layered
                .remove("SYNC_REQUEST_TIMEOUT_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_sync_request_timeout_seconds),
            sales_channel: layered
                .remove("SYNC_SALES_CHANNEL")
                .filter(|v| !v.is_empty())
                .unwrap_or_else(default_sync_sales_channel),
        };

        let scheduler = SchedulerConfig {
            enabled: layered
                .remove("SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            interval_seconds: layered
                .remove("SCHEDULER_INTERVAL_SECONDS")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_scheduler_interval_seconds),
            jitter_pct_min: layered
                .remove("SCHEDULER_JITTER_PCT_MIN")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_scheduler_jitter_pct_min),
            jitter_pct_max: layered
                .remove("SCHEDULER_JITTER_PCT_MAX")
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_scheduler_jitter_pct_max),
        };

        let config = AppConfig {
            profile,
            api_bind_addr,
            log_level,
            log_format,
            airtable_token,
            airtable_base_id,
            airtable_api_base,
            orders_table,
            customers_table,
            inventory_table,
            trendyol_seller_id,
            trendyol_api_key,
            trendyol_api_secret,
            trendyol_api_base,
            trendyol_feed,
            trendyol_auth_style,
            cron_secret,
            watermark_path,
            watermark_ms,
            sync,
            scheduler,
        };

        config.validate()?;

        match config.bind_addr() {
            Ok(_) => Ok(config),
            Err(source) => Err(ConfigError::InvalidBindAddr {
                value: config.api_bind_addr.clone(),
                source,
            }),
        }
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("ORDERBRIDGE_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix("ORDERBRIDGE_") {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated_config() -> AppConfig {
        AppConfig {
            airtable_token: "pat123".to_string(),
            airtable_base_id: "appBase".to_string(),
            trendyol_seller_id: "1001".to_string(),
            trendyol_api_key: "key".to_string(),
            trendyol_api_secret: "secret".to_string(),
            ..AppConfig::default()
        }
    }

    #[test]
    fn validate_accepts_populated_config() {
        assert!(populated_config().validate().is_ok());
    }

    #[test]
    fn validate_requires_store_credentials() {
        let config = AppConfig {
            airtable_token: String::new(),
            ..populated_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingAirtableToken)
        ));
    }

    #[test]
    fn validate_requires_feed_credentials() {
        let config = AppConfig {
            trendyol_api_secret: String::new(),
            ..populated_config()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingTrendyolCredentials)
        ));
    }

    #[test]
    fn test_profile_skips_credential_checks() {
        let config = AppConfig {
            profile: "test".to_string(),
            ..AppConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sync_bounds_are_enforced() {
        let mut config = populated_config();
        config.sync.page_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSyncPageSize { value: 0 })
        ));

        let mut config = populated_config();
        config.sync.request_timeout_seconds = 600;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSyncRequestTimeout { value: 600 })
        ));
    }

    #[test]
    fn scheduler_interval_only_checked_when_enabled() {
        let mut config = populated_config();
        config.scheduler.interval_seconds = 10;
        assert!(config.validate().is_ok());

        config.scheduler.enabled = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSchedulerInterval { value: 10 })
        ));
    }

    #[test]
    fn redacted_json_hides_secrets() {
        let mut config = populated_config();
        config.cron_secret = Some("hunter2".to_string());

        let redacted = config.redacted_json().unwrap();
        assert!(!redacted.contains("pat123"));
        assert!(!redacted.contains("hunter2"));
        assert!(redacted.contains("[REDACTED]"));
    }
}
