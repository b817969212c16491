//! Webhook payload signing.
//!
//! Deliveries carry `X-Spool-Signature-256: sha256=<hex>` where the hex value
//! is an HMAC-SHA256 over the exact request body bytes, keyed with the shared
//! webhook secret.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-spool-signature-256";
pub const DELIVERY_HEADER: &str = "x-spool-delivery";
pub const EVENT_HEADER: &str = "x-spool-event";
pub const TIMESTAMP_HEADER: &str = "x-spool-timestamp";
/// Set on consumer responses when the change handler failed.
pub const ERROR_HEADER: &str = "x-spool-error";

const SIGNATURE_PREFIX: &str = "sha256=";

/// Sign a request body, returning the full header value.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|error| Error::Dispatch(format!("Invalid webhook secret: {error}")))?;
    mac.update(body);
    Ok(format!(
        "{SIGNATURE_PREFIX}{}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Verify a signature header value against a body in constant time.
///
/// Returns `false` for a malformed header rather than an error.
pub fn verify_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_part) = header_value.trim().strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    #[test]
    fn signature_has_prefix_and_hex_digest() {
        let header = sign_payload(SECRET, b"{}").unwrap();
        let digest = header.strip_prefix("sha256=").unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn signed_payload_verifies() {
        let body = br#"{"event":"content.updated"}"#;
        let header = sign_payload(SECRET, body).unwrap();
        assert!(verify_signature(SECRET, body, &header));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let header = sign_payload(SECRET, br#"{"slug":"a"}"#).unwrap();
        assert!(!verify_signature(SECRET, br#"{"slug":"b"}"#, &header));
    }

    #[test]
    fn wrong_secret_fails_verification() {
        let body = b"payload";
        let header = sign_payload(SECRET, body).unwrap();
        assert!(!verify_signature("other", body, &header));
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert!(!verify_signature(SECRET, b"x", ""));
        assert!(!verify_signature(SECRET, b"x", "sha1=abcd"));
        assert!(!verify_signature(SECRET, b"x", "sha256=not-hex"));
    }
}
