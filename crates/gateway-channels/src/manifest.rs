use std::collections::HashMap;

use gateway_core::GatewayError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionScope {
    User,
    UserConversation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelCapability {
    InboundText,
    OutboundText,
    InboundImage,
    OutboundImage,
    InboundAudio,
    OutboundAudio,
    InboundFile,
    OutboundFile,
    Interactive,
    Threading,
    Reactions,
    TypingIndicator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityMode {
    ChatOnly,
    ChatExecRestricted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigField {
    pub name: String,
    pub label: String,
    #[serde(default = "default_field_type")]
    pub field_type: String,
    #[serde(default = "default_true")]
    pub required: bool,
    pub default: Option<String>,
    pub placeholder: Option<String>,
    pub help_text: Option<String>,
    #[serde(default)]
    pub secret: bool,
    pub validation_regex: Option<String>,
    pub validation_error: Option<String>,
    #[serde(default)]
    pub options: Vec<String>,
}

fn default_field_type() -> String {
    "text".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupStep {
    pub title: String,
    pub description: String,
    pub instruction: Option<String>,
    pub animation_url: Option<String>,
    #[serde(default)]
    pub checklist: Vec<String>,
    #[serde(default)]
    pub auto_check: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityDefaults {
    #[serde(default = "default_security_mode")]
    pub mode: SecurityMode,
    #[serde(default)]
    pub allow_execute: bool,
    #[serde(default = "default_allowed_commands")]
    pub allowed_commands: Vec<String>,
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: i64,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_true")]
    pub require_signature: bool,
}

fn default_security_mode() -> SecurityMode {
    SecurityMode::ChatOnly
}
fn default_allowed_commands() -> Vec<String> {
    vec!["/session".to_string(), "/help".to_string()]
}
fn default_rate_limit_per_minute() -> i64 {
    20
}
fn default_retention_days() -> i64 {
    7
}

impl Default for SecurityDefaults {
    fn default() -> Self {
        Self {
            mode: default_security_mode(),
            allow_execute: false,
            allowed_commands: default_allowed_commands(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            retention_days: default_retention_days(),
            require_signature: true,
        }
    }
}

fn default_privacy_badges() -> Vec<String> {
    vec![
        "No Auto Provisioning".to_string(),
        "Chat-only".to_string(),
        "Local Storage".to_string(),
        "Secrets Encrypted".to_string(),
    ]
}

/// Describes a channel adapter's capabilities, configuration surface, and
/// setup flow. Drives the management UI as well as [`ConfigField`]
/// validation — the same regex surface advertised here is what
/// `validate_config` enforces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelManifest {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub description: String,
    pub long_description: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    pub provider: Option<String>,
    pub docs_url: Option<String>,
    #[serde(default)]
    pub required_config_fields: Vec<ConfigField>,
    #[serde(default)]
    pub webhook_paths: Vec<String>,
    #[serde(default = "default_session_scope")]
    pub session_scope: SessionScope,
    #[serde(default)]
    pub capabilities: Vec<ChannelCapability>,
    #[serde(default)]
    pub security_defaults: SecurityDefaults,
    #[serde(default)]
    pub setup_steps: Vec<SetupStep>,
    #[serde(default = "default_privacy_badges")]
    pub privacy_badges: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

fn default_version() -> String {
    "1.0.0".to_string()
}
fn default_session_scope() -> SessionScope {
    SessionScope::User
}

impl ChannelManifest {
    /// Validate a raw config map against `required_config_fields`: presence
    /// of required fields, then regex format for any field that declares
    /// one. Fields absent and not required are skipped.
    pub fn validate_config(&self, config: &HashMap<String, Value>) -> Result<(), GatewayError> {
        for field in &self.required_config_fields {
            let Some(value) = config.get(&field.name) else {
                if field.required {
                    return Err(GatewayError::Validation(format!(
                        "missing required field: {}",
                        field.label
                    )));
                }
                continue;
            };

            if let Some(pattern) = &field.validation_regex {
                let value_str = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                let re = Regex::new(pattern).map_err(|e| {
                    GatewayError::Config(format!("invalid validation_regex for {}: {e}", field.name))
                })?;
                if !re.is_match(&value_str) {
                    return Err(GatewayError::Validation(
                        field
                            .validation_error
                            .clone()
                            .unwrap_or_else(|| format!("invalid format for {}", field.label)),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn manifest() -> ChannelManifest {
        ChannelManifest {
            id: "telegram".into(),
            name: "Telegram".into(),
            icon: "telegram".into(),
            description: "Telegram bot".into(),
            long_description: None,
            version: default_version(),
            provider: Some("Telegram".into()),
            docs_url: None,
            required_config_fields: vec![ConfigField {
                name: "bot_token".into(),
                label: "Bot Token".into(),
                field_type: default_field_type(),
                required: true,
                default: None,
                placeholder: None,
                help_text: None,
                secret: true,
                validation_regex: Some(r"^\d+:[A-Za-z0-9_-]+$".into()),
                validation_error: Some("invalid bot token format".into()),
                options: vec![],
            }],
            webhook_paths: vec!["/webhooks/telegram".into()],
            session_scope: default_session_scope(),
            capabilities: vec![ChannelCapability::InboundText, ChannelCapability::OutboundText],
            security_defaults: SecurityDefaults::default(),
            setup_steps: vec![],
            privacy_badges: default_privacy_badges(),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn rejects_missing_required_field() {
        let m = manifest();
        let err = m.validate_config(&HashMap::new()).unwrap_err();
        assert_eq!(err.code(), "VALIDATION");
    }

    #[test]
    fn rejects_value_failing_regex() {
        let m = manifest();
        let mut cfg = HashMap::new();
        cfg.insert("bot_token".to_string(), json!("not-a-token"));
        assert!(m.validate_config(&cfg).is_err());
    }

    #[test]
    fn accepts_well_formed_value() {
        let m = manifest();
        let mut cfg = HashMap::new();
        cfg.insert("bot_token".to_string(), json!("123456:abcDEF-ghi"));
        assert!(m.validate_config(&cfg).is_ok());
    }
}
