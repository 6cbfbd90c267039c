use subtle::ConstantTimeEq;

/// Telegram webhooks don't sign the body; instead the bot registers a secret
/// token with `setWebhook` and Telegram echoes it back verbatim on every
/// call via `X-Telegram-Bot-Api-Secret-Token`. Verification is just a
/// constant-time equality check against the configured secret.
pub fn verify_secret_token(configured_secret: &str, header_value: &str) -> bool {
    configured_secret
        .as_bytes()
        .ct_eq(header_value.as_bytes())
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matching_token_accepted() {
        assert!(verify_secret_token("shh-its-a-secret", "shh-its-a-secret"));
    }

    #[test]
    fn mismatched_token_rejected() {
        assert!(!verify_secret_token("shh-its-a-secret", "guess"));
    }

    #[test]
    fn different_length_rejected() {
        assert!(!verify_secret_token("shh-its-a-secret", "shh-its-a-secret-but-longer"));
    }
}
