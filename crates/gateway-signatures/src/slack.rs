use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const MAX_CLOCK_SKEW_SECS: i64 = 5 * 60;

/// Slack's v0 signing scheme: `HMAC-SHA256(signing_secret, "v0:{ts}:{body}")`,
/// hex-encoded and prefixed with `v0=`, compared against
/// `X-Slack-Signature`. `X-Slack-Request-Timestamp` must be within
/// [`MAX_CLOCK_SKEW_SECS`] of `now` or the request is treated as a replay.
pub fn verify_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &str,
    signature_header: &str,
    now_epoch_s: i64,
) -> bool {
    let ts: i64 = match timestamp.parse() {
        Ok(ts) => ts,
        Err(_) => return false,
    };
    if (now_epoch_s - ts).abs() > MAX_CLOCK_SKEW_SECS {
        return false;
    }

    let basestring = format!("v0:{}:{}", timestamp, body);
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(basestring.as_bytes());
    let expected = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

    expected.as_bytes().ct_eq(signature_header.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, ts: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("v0:{}:{}", ts, body).as_bytes());
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_fresh_timestamp() {
        let sig = sign("secret", "1000", "payload");
        assert!(verify_signature("secret", "1000", "payload", &sig, 1000));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let sig = sign("secret", "1000", "payload");
        assert!(!verify_signature("secret", "1000", "payload", &sig, 1000 + MAX_CLOCK_SKEW_SECS + 1));
    }

    #[test]
    fn mutating_body_flips_result() {
        let sig = sign("secret", "1000", "payload");
        assert!(!verify_signature("secret", "1000", "other payload", &sig, 1000));
    }

    #[test]
    fn rejects_unparseable_timestamp() {
        assert!(!verify_signature("secret", "not-a-number", "payload", "v0=whatever", 1000));
    }
}
