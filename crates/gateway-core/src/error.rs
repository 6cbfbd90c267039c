use thiserror::Error;

/// Error taxonomy for the gateway (§7 ERROR HANDLING DESIGN).
///
/// Every variant maps to one SCREAMING_SNAKE code via [`GatewayError::code`],
/// mirroring how `SkynetError` reports codes to WS clients.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Malformed payload, failing field validation, bad enum.
    #[error("validation error: {0}")]
    Validation(String),

    /// Signature/secret failures — surfaced at the HTTP boundary only.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Produced by RateLimitMiddleware.
    #[error("rate limit exceeded: {0}")]
    RateLimit(String),

    /// Produced by DedupeMiddleware.
    #[error("duplicate message: {0}")]
    Duplicate(String),

    /// operation_denied | command_not_whitelisted | rate_limit_exceeded |
    /// invalid_token | remote_exposure_warning.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// Adapter send_message network/provider failure.
    #[error("transport error ({channel}): {reason}")]
    Transport { channel: String, reason: String },

    /// Store failures; schema-init failures are fatal, others are retried
    /// by the caller.
    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => "VALIDATION",
            GatewayError::Authentication(_) => "AUTHENTICATION",
            GatewayError::RateLimit(_) => "RATE_LIMIT",
            GatewayError::Duplicate(_) => "DUPLICATE",
            GatewayError::PolicyViolation(_) => "POLICY_VIOLATION",
            GatewayError::Transport { .. } => "TRANSPORT",
            GatewayError::Persistence(_) => "PERSISTENCE",
            GatewayError::ChannelNotFound(_) => "CHANNEL_NOT_FOUND",
            GatewayError::Config(_) => "CONFIG_ERROR",
            GatewayError::Serialization(_) => "SERIALIZATION_ERROR",
            GatewayError::Io(_) => "IO_ERROR",
        }
    }
}

impl From<rusqlite::Error> for GatewayError {
    fn from(e: rusqlite::Error) -> Self {
        GatewayError::Persistence(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
