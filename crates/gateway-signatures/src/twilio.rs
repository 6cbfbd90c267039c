use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Twilio's param-signing scheme, shared by WhatsApp and SMS webhooks:
/// `HMAC-SHA256(auth_token, url + Σᵢ(sorted_key_i || value_i))`, hex-encoded.
///
/// `params` need not be pre-sorted; this function sorts by key itself so
/// callers can hand it the raw form-decoded pairs in arbitrary order.
pub fn compute_signature(auth_token: &str, url: &str, params: &[(String, String)]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut data = String::from(url);
    for (key, value) in &sorted {
        data.push_str(key);
        data.push_str(value);
    }

    let mut mac = HmacSha256::new_from_slice(auth_token.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time comparison against `X-Twilio-Signature` (WhatsApp webhook
/// uses the hex variant of the Twilio scheme, per §4.6.1/§6).
pub fn verify_signature(
    auth_token: &str,
    url: &str,
    params: &[(String, String)],
    signature_header: &str,
) -> bool {
    let expected = compute_signature(auth_token, url, params);
    expected.as_bytes().ct_eq(signature_header.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> Vec<(String, String)> {
        vec![
            ("Body".to_string(), "hello".to_string()),
            ("From".to_string(), "whatsapp:+15551234567".to_string()),
        ]
    }

    #[test]
    fn round_trips() {
        let sig = compute_signature("auth-token", "https://example.com/webhook", &sample_params());
        assert!(verify_signature("auth-token", "https://example.com/webhook", &sample_params(), &sig));
    }

    #[test]
    fn mutating_a_param_value_flips_result() {
        let sig = compute_signature("auth-token", "https://example.com/webhook", &sample_params());
        let mut mutated = sample_params();
        mutated[0].1 = "goodbye".to_string();
        assert!(!verify_signature("auth-token", "https://example.com/webhook", &mutated, &sig));
    }

    #[test]
    fn mutating_url_flips_result() {
        let sig = compute_signature("auth-token", "https://example.com/webhook", &sample_params());
        assert!(!verify_signature("auth-token", "https://example.com/other", &sample_params(), &sig));
    }

    #[test]
    fn mutating_a_param_key_flips_result() {
        let sig = compute_signature("auth-token", "https://example.com/webhook", &sample_params());
        let mut mutated = sample_params();
        mutated[0].0 = "Bodyx".to_string();
        assert!(!verify_signature("auth-token", "https://example.com/webhook", &mutated, &sig));
    }
}
