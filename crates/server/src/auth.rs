//! Webhook signature verification (§6 "Telephony-provider webhook
//! signatures are verified before dispatch"). `Hmac::verify_slice` compares
//! in constant time internally, so callers never do `==` on raw MAC bytes.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::ServerError;

type HmacSha256 = Hmac<Sha256>;

/// Verifies `signature_hex` (a hex-encoded HMAC-SHA256) against `body` using
/// `secret`. Returns `Err(ServerError::InvalidSignature)` on any mismatch or
/// malformed input — never leaks which part failed.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature_hex: &str) -> Result<(), ServerError> {
    let expected = hex_decode(signature_hex).ok_or(ServerError::InvalidSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| ServerError::InvalidSignature)?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| ServerError::InvalidSignature)
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let bytes = mac.finalize().into_bytes();
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn accepts_a_correctly_signed_body() {
        let body = br#"{"call_id":"abc"}"#;
        let sig = sign("shared-secret", body);
        assert!(verify_webhook_signature("shared-secret", body, &sig).is_ok());
    }

    #[test]
    fn rejects_a_tampered_body() {
        let body = br#"{"call_id":"abc"}"#;
        let sig = sign("shared-secret", body);
        assert!(verify_webhook_signature("shared-secret", br#"{"call_id":"xyz"}"#, &sig).is_err());
    }

    #[test]
    fn rejects_malformed_hex() {
        let body = b"payload";
        assert!(verify_webhook_signature("secret", body, "not-hex").is_err());
    }
}
