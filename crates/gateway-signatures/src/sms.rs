use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;

type HmacSha1 = Hmac<Sha1>;

/// Twilio's classic SMS/voice webhook scheme: `HMAC-SHA1(auth_token, url +
/// Σᵢ(sorted_key_i || value_i))`, base64-encoded. Same param-concatenation
/// rule as the WhatsApp scheme in [`crate::twilio`], different digest and
/// encoding (this is the long-standing `X-Twilio-Signature` format Twilio
/// has used for SMS since before the WhatsApp API existed).
pub fn compute_signature(auth_token: &str, url: &str, params: &[(String, String)]) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut data = String::from(url);
    for (key, value) in &sorted {
        data.push_str(key);
        data.push_str(value);
    }

    let mut mac =
        HmacSha1::new_from_slice(auth_token.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(data.as_bytes());
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, mac.finalize().into_bytes())
}

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
            ("Body".to_string(), "call me".to_string()),
            ("From".to_string(), "+15551234567".to_string()),
        ]
    }

    #[test]
    fn round_trips() {
        let sig = compute_signature("auth-token", "https://example.com/sms", &sample_params());
        assert!(verify_signature("auth-token", "https://example.com/sms", &sample_params(), &sig));
    }

    #[test]
    fn mutating_a_param_value_flips_result() {
        let sig = compute_signature("auth-token", "https://example.com/sms", &sample_params());
        let mut mutated = sample_params();
        mutated[0].1 = "different".to_string();
        assert!(!verify_signature("auth-token", "https://example.com/sms", &mutated, &sig));
    }
}
