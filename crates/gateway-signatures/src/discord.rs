use ed25519_dalek::{Signature, Verifier, VerifyingKey};

/// Discord interaction webhooks are Ed25519-signed: the verifying key is the
/// bot's public key (hex, from the developer portal), the signed message is
/// `timestamp || body` and the signature arrives hex-encoded in
/// `X-Signature-Ed25519` alongside `X-Signature-Timestamp`.
pub fn verify_signature(
    public_key_hex: &str,
    timestamp: &str,
    body: &str,
    signature_hex: &str,
) -> bool {
    let Ok(key_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(key_bytes): Result<[u8; 32], _> = key_bytes.try_into() else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };

    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig_bytes): Result<[u8; 64], _> = sig_bytes.try_into() else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);

    let mut message = Vec::with_capacity(timestamp.len() + body.len());
    message.extend_from_slice(timestamp.as_bytes());
    message.extend_from_slice(body.as_bytes());

    verifying_key.verify(&message, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};

    fn signed_fixture(timestamp: &str, body: &str) -> (String, String, String) {
        let signing_key = SigningKey::from_bytes(&[7u8; 32]);
        let verifying_key = signing_key.verifying_key();
        let mut message = Vec::new();
        message.extend_from_slice(timestamp.as_bytes());
        message.extend_from_slice(body.as_bytes());
        let signature = signing_key.sign(&message);
        (
            hex::encode(verifying_key.to_bytes()),
            hex::encode(signature.to_bytes()),
            body.to_string(),
        )
    }

    #[test]
    fn valid_signature_accepted() {
        let (pubkey, sig, body) = signed_fixture("1700000000", "{\"type\":1}");
        assert!(verify_signature(&pubkey, "1700000000", &body, &sig));
    }

    #[test]
    fn mutated_body_rejected() {
        let (pubkey, sig, _) = signed_fixture("1700000000", "{\"type\":1}");
        assert!(!verify_signature(&pubkey, "1700000000", "{\"type\":2}", &sig));
    }

    #[test]
    fn malformed_hex_rejected() {
        assert!(!verify_signature("not-hex", "1700000000", "body", "also-not-hex"));
    }
}
