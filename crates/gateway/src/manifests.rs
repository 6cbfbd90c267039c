use std::collections::HashMap;

use gateway_channels::{
    ChannelCapability, ChannelManifest, ConfigField, SecurityDefaults, SessionScope, SetupStep,
};

fn field(name: &str, label: &str, required: bool, secret: bool, regex: Option<&str>, error: Option<&str>) -> ConfigField {
    ConfigField {
        name: name.to_string(),
        label: label.to_string(),
        field_type: "text".to_string(),
        required,
        default: None,
        placeholder: None,
        help_text: None,
        secret,
        validation_regex: regex.map(str::to_string),
        validation_error: error.map(str::to_string),
        options: vec![],
    }
}

fn setup(title: &str, description: &str) -> SetupStep {
    SetupStep {
        title: title.to_string(),
        description: description.to_string(),
        instruction: None,
        animation_url: None,
        checklist: vec![],
        auto_check: false,
    }
}

pub fn whatsapp_twilio_manifest(channel_id: &str) -> ChannelManifest {
    ChannelManifest {
        id: channel_id.to_string(),
        name: "WhatsApp (Twilio)".to_string(),
        icon: "whatsapp".to_string(),
        description: "WhatsApp messaging through Twilio's Business API".to_string(),
        long_description: None,
        version: "1.0.0".to_string(),
        provider: Some("Twilio".to_string()),
        docs_url: Some("https://www.twilio.com/docs/whatsapp".to_string()),
        required_config_fields: vec![
            field("account_sid", "Account SID", true, false, Some(r"^AC[a-zA-Z0-9]{32}$"), Some("Twilio Account SIDs start with AC")),
            field("auth_token", "Auth Token", true, true, None, None),
            field("from_number", "From Number", true, false, Some(r"^\+[1-9]\d{1,14}$"), Some("must be an E.164 phone number")),
        ],
        webhook_paths: vec![format!("/webhook/{channel_id}")],
        session_scope: SessionScope::User,
        capabilities: vec![
            ChannelCapability::InboundText,
            ChannelCapability::OutboundText,
            ChannelCapability::InboundImage,
            ChannelCapability::InboundAudio,
        ],
        security_defaults: SecurityDefaults::default(),
        setup_steps: vec![
            setup("Create a Twilio account", "Sign up and enable the WhatsApp sandbox or a production sender."),
            setup("Point the webhook", "Set the WhatsApp sandbox webhook to this gateway's public URL."),
        ],
        privacy_badges: vec![],
        metadata: HashMap::new(),
    }
}

pub fn telegram_manifest(channel_id: &str) -> ChannelManifest {
    ChannelManifest {
        id: channel_id.to_string(),
        name: "Telegram".to_string(),
        icon: "telegram".to_string(),
        description: "Telegram bot via the Bot API webhook".to_string(),
        long_description: None,
        version: "1.0.0".to_string(),
        provider: Some("Telegram".to_string()),
        docs_url: Some("https://core.telegram.org/bots/api".to_string()),
        required_config_fields: vec![
            field("bot_token", "Bot Token", true, true, Some(r"^\d+:[A-Za-z0-9_-]+$"), Some("invalid bot token format")),
            field("webhook_secret_token", "Webhook Secret Token", true, true, None, None),
        ],
        webhook_paths: vec![format!("/webhook/{channel_id}")],
        session_scope: SessionScope::User,
        capabilities: vec![
            ChannelCapability::InboundText,
            ChannelCapability::OutboundText,
            ChannelCapability::InboundImage,
            ChannelCapability::InboundAudio,
            ChannelCapability::InboundFile,
        ],
        security_defaults: SecurityDefaults::default(),
        setup_steps: vec![setup("Create a bot", "Talk to @BotFather to get a bot token, then register the webhook.")],
        privacy_badges: vec![],
        metadata: HashMap::new(),
    }
}

pub fn slack_manifest(channel_id: &str) -> ChannelManifest {
    ChannelManifest {
        id: channel_id.to_string(),
        name: "Slack".to_string(),
        icon: "slack".to_string(),
        description: "Slack app via the Events API".to_string(),
        long_description: None,
        version: "1.0.0".to_string(),
        provider: Some("Slack".to_string()),
        docs_url: Some("https://api.slack.com/apis/events-api".to_string()),
        required_config_fields: vec![
            field("signing_secret", "Signing Secret", true, true, None, None),
            field("bot_token", "Bot Token", true, true, Some(r"^xoxb-"), Some("bot tokens start with xoxb-")),
        ],
        webhook_paths: vec![format!("/webhook/{channel_id}")],
        session_scope: SessionScope::UserConversation,
        capabilities: vec![
            ChannelCapability::InboundText,
            ChannelCapability::OutboundText,
            ChannelCapability::Threading,
        ],
        security_defaults: SecurityDefaults::default(),
        setup_steps: vec![setup("Create a Slack app", "Enable Event Subscriptions and point them at this gateway.")],
        privacy_badges: vec![],
        metadata: HashMap::new(),
    }
}

pub fn discord_manifest(channel_id: &str) -> ChannelManifest {
    ChannelManifest {
        id: channel_id.to_string(),
        name: "Discord".to_string(),
        icon: "discord".to_string(),
        description: "Discord application commands over interaction webhooks".to_string(),
        long_description: None,
        version: "1.0.0".to_string(),
        provider: Some("Discord".to_string()),
        docs_url: Some("https://discord.com/developers/docs/interactions/receiving-and-responding".to_string()),
        required_config_fields: vec![
            field("application_id", "Application ID", true, false, None, None),
            field("public_key", "Public Key", true, false, Some(r"^[0-9a-fA-F]{64}$"), Some("must be a 64-char hex ed25519 key")),
            field("bot_token", "Bot Token", true, true, None, None),
        ],
        webhook_paths: vec![format!("/webhook/{channel_id}/interactions")],
        session_scope: SessionScope::User,
        capabilities: vec![ChannelCapability::InboundText, ChannelCapability::Interactive],
        security_defaults: SecurityDefaults::default(),
        setup_steps: vec![setup("Register an application", "Create a Discord application and set the interactions endpoint URL.")],
        privacy_badges: vec![],
        metadata: HashMap::new(),
    }
}

pub fn email_manifest(channel_id: &str) -> ChannelManifest {
    ChannelManifest {
        id: channel_id.to_string(),
        name: "Email".to_string(),
        icon: "email".to_string(),
        description: "IMAP polling with SMTP replies".to_string(),
        long_description: None,
        version: "1.0.0".to_string(),
        provider: Some("IMAP/SMTP".to_string()),
        docs_url: None,
        required_config_fields: vec![
            field("imap_host", "IMAP Host", true, false, None, None),
            field("smtp_host", "SMTP Host", true, false, None, None),
            field("username", "Username", true, false, None, None),
            field("password", "Password", true, true, None, None),
        ],
        webhook_paths: vec![],
        session_scope: SessionScope::UserConversation,
        capabilities: vec![
            ChannelCapability::InboundText,
            ChannelCapability::OutboundText,
            ChannelCapability::InboundFile,
            ChannelCapability::Threading,
        ],
        security_defaults: SecurityDefaults::default(),
        setup_steps: vec![setup("Create an app password", "Most providers require an app password rather than your account password.")],
        privacy_badges: vec![],
        metadata: HashMap::new(),
    }
}

pub fn sms_twilio_manifest(channel_id: &str) -> ChannelManifest {
    ChannelManifest {
        id: channel_id.to_string(),
        name: "SMS (Twilio)".to_string(),
        icon: "sms".to_string(),
        description: "Plain SMS through Twilio's Programmable Messaging API".to_string(),
        long_description: None,
        version: "1.0.0".to_string(),
        provider: Some("Twilio".to_string()),
        docs_url: Some("https://www.twilio.com/docs/sms".to_string()),
        required_config_fields: vec![
            field("account_sid", "Account SID", true, false, Some(r"^AC[a-zA-Z0-9]{32}$"), Some("Twilio Account SIDs start with AC")),
            field("auth_token", "Auth Token", true, true, None, None),
            field("from_number", "From Number", true, false, Some(r"^\+[1-9]\d{1,14}$"), Some("must be an E.164 phone number")),
        ],
        webhook_paths: vec![format!("/webhook/sms/twilio/{{path_token}}")],
        session_scope: SessionScope::User,
        capabilities: vec![ChannelCapability::InboundText, ChannelCapability::OutboundText],
        security_defaults: SecurityDefaults::default(),
        setup_steps: vec![setup("Point an SMS number", "Set the number's messaging webhook to this gateway's SMS path.")],
        privacy_badges: vec![],
        metadata: HashMap::new(),
    }
}
