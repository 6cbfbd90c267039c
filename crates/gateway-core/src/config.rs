use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

// Gateway-wide constants.
pub const DEFAULT_PORT: u16 = 8088;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_DEDUPE_TTL_MS: i64 = 24 * 60 * 60 * 1000;
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: i64 = 60_000;
pub const DEFAULT_RATE_LIMIT_MAX: i64 = 20;
pub const DEFAULT_AUDIT_RETENTION_DAYS: i64 = 30;
pub const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8088";

/// Top-level config (gateway.toml + GATEWAY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub http: HttpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub middleware: MiddlewareConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            http: HttpConfig {
                port: DEFAULT_PORT,
                bind: DEFAULT_BIND.to_string(),
                public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            },
            database: DatabaseConfig::default(),
            channels: ChannelsConfig::default(),
            middleware: MiddlewareConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Externally reachable base URL (no trailing slash) used to
    /// reconstruct the exact webhook URL Twilio signed.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    #[serde(default = "default_dedupe_ttl_ms")]
    pub dedupe_ttl_ms: i64,
    #[serde(default = "default_rate_window_ms")]
    pub rate_limit_window_ms: i64,
    #[serde(default = "default_rate_max")]
    pub rate_limit_max_requests: i64,
    #[serde(default = "default_audit_retention_days")]
    pub audit_retention_days: i64,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            dedupe_ttl_ms: DEFAULT_DEDUPE_TTL_MS,
            rate_limit_window_ms: DEFAULT_RATE_LIMIT_WINDOW_MS,
            rate_limit_max_requests: DEFAULT_RATE_LIMIT_MAX,
            audit_retention_days: DEFAULT_AUDIT_RETENTION_DAYS,
        }
    }
}

fn default_dedupe_ttl_ms() -> i64 {
    DEFAULT_DEDUPE_TTL_MS
}
fn default_rate_window_ms() -> i64 {
    DEFAULT_RATE_LIMIT_WINDOW_MS
}
fn default_rate_max() -> i64 {
    DEFAULT_RATE_LIMIT_MAX
}
fn default_audit_retention_days() -> i64 {
    DEFAULT_AUDIT_RETENTION_DAYS
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    pub whatsapp_twilio: Option<WhatsAppTwilioConfig>,
    pub telegram: Option<TelegramConfig>,
    pub slack: Option<SlackConfig>,
    pub discord: Option<DiscordConfig>,
    pub email: Vec<EmailConfig>,
    pub sms_twilio: Option<SmsTwilioConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppTwilioConfig {
    pub channel_id: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub channel_id: String,
    pub bot_token: String,
    pub webhook_secret_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    pub channel_id: String,
    pub signing_secret: String,
    pub bot_token: String,
    #[serde(default = "default_slack_trigger")]
    pub trigger_policy: String,
}

fn default_slack_trigger() -> String {
    "mention_or_dm".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub channel_id: String,
    pub application_id: String,
    pub public_key: String,
    pub bot_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub channel_id: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_poll_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmsTwilioConfig {
    pub channel_id: String,
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
    pub path_token: String,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_public_base_url() -> String {
    DEFAULT_PUBLIC_BASE_URL.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.gateway/gateway.db", home)
}

impl GatewayConfig {
    /// Load config from a TOML file with GATEWAY_* env var overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path.map(String::from).unwrap_or_else(default_config_path);

        let config: GatewayConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("GATEWAY_").split("_"))
            .extract()
            .map_err(|e| GatewayError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.gateway/gateway.toml", home)
}
