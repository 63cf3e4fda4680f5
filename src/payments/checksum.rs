//! Signatures for both gateway channels.
//!
//! PhonePe signs synchronous API traffic with a salted SHA-256 checksum
//! (`sha256(payload + endpoint + saltKey)###saltIndex` in the X-VERIFY
//! header) and asynchronous webhooks with plain HMAC-SHA256 over the
//! raw body. Both verifiers compare in constant time and fail closed on
//! malformed input; nothing here ever logs the salt key or secret.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const CHECKSUM_SEPARATOR: &str = "###";

/// Builds the X-VERIFY header value for an outbound request.
///
/// `data` is the base64 payload with the target endpoint path already
/// appended (for callbacks, the merchant-transaction-id path segment).
pub fn x_verify(data: &str, salt_key: &str, salt_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hasher.update(salt_key.as_bytes());
    format!(
        "{}{}{}",
        hex::encode(hasher.finalize()),
        CHECKSUM_SEPARATOR,
        salt_index
    )
}

/// Verifies a received X-VERIFY value against `data`.
///
/// The salt index is taken from the received header so a rotated key
/// index still verifies, but only the hash part participates in the
/// comparison. Malformed headers are simply invalid.
pub fn verify_x_verify(data: &str, salt_key: &str, received: &str) -> bool {
    let Some((received_hash, index_part)) = received.split_once(CHECKSUM_SEPARATOR) else {
        return false;
    };
    if index_part.parse::<u32>().is_err() {
        return false;
    }

    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hasher.update(salt_key.as_bytes());
    let expected = hex::encode(hasher.finalize());

    expected.as_bytes().ct_eq(received_hash.as_bytes()).into()
}

/// Hex HMAC-SHA256 over the raw webhook body.
pub fn webhook_signature(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

pub fn verify_webhook_signature(body: &[u8], secret: &str, received: &str) -> bool {
    let expected = webhook_signature(body, secret);
    expected.as_bytes().ct_eq(received.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &str = "1e6ee208-b4b2-4b43-9a37-1b1a9d63c473";

    #[test]
    fn x_verify_round_trip() {
        let data = "eyJhIjoxfQ==/pg/v1/pay";
        let header = x_verify(data, SALT, 1);
        assert!(header.ends_with("###1"));
        assert!(verify_x_verify(data, SALT, &header));
    }

    #[test]
    fn x_verify_rejects_tampered_payload() {
        let header = x_verify("eyJhIjoxfQ==/pg/v1/pay", SALT, 1);
        assert!(!verify_x_verify("eyJhIjoyfQ==/pg/v1/pay", SALT, &header));
    }

    #[test]
    fn x_verify_rejects_wrong_salt() {
        let header = x_verify("payload", SALT, 1);
        assert!(!verify_x_verify("payload", "other-salt", &header));
    }

    #[test]
    fn malformed_headers_fail_closed() {
        assert!(!verify_x_verify("payload", SALT, ""));
        assert!(!verify_x_verify("payload", SALT, "nohashseparator"));
        assert!(!verify_x_verify("payload", SALT, "deadbeef###notanumber"));
    }

    #[test]
    fn webhook_signature_round_trip() {
        let body = br#"{"merchantTransactionId":"TP-1-ab","code":"PAYMENT_SUCCESS"}"#;
        let sig = webhook_signature(body, "whsec_test");
        assert!(verify_webhook_signature(body, "whsec_test", &sig));
        assert!(!verify_webhook_signature(body, "whsec_other", &sig));
        assert!(!verify_webhook_signature(b"{}", "whsec_test", &sig));
    }

    #[test]
    fn webhook_signature_length_mismatch_fails_closed() {
        let body = b"payload";
        assert!(!verify_webhook_signature(body, "whsec_test", "short"));
        assert!(!verify_webhook_signature(body, "whsec_test", ""));
    }
}
