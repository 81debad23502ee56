//! Signed-request authentication for the API boundary.
//!
//! Canonical request string: `UPPER(method) ":" path ":" timestamp ":"
//! canonical_json(body)`. Clients send the signature in `X-Signature`
//! alongside `X-Pubkey` and `X-Timestamp`; verification rejects requests
//! whose timestamp falls outside the replay window.

use serde_json::Value;
use thiserror::Error;

use crate::canonical::canonical_json;
use crate::keypair::{verify_signature, NodeKeypair};
use crate::time::unix_now;

/// Maximum allowed clock skew between client and node, in seconds.
pub const REPLAY_WINDOW_SECS: u64 = 300;

/// Authentication failures surfaced to API callers.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing authentication headers (X-Pubkey, X-Signature, X-Timestamp)")]
    MissingHeaders,

    #[error("invalid timestamp format")]
    BadTimestamp,

    #[error("request timestamp outside replay window")]
    Expired,

    #[error("unknown or malformed public key")]
    UnknownKey,

    #[error("invalid signature")]
    BadSignature,
}

/// Headers produced when signing an outgoing request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub pubkey: String,
    pub timestamp: String,
    pub signature: String,
}

/// Build the canonical payload covered by a request signature.
fn request_payload(method: &str, path: &str, timestamp: u64, body: &Value) -> String {
    format!(
        "{}:{}:{}:{}",
        method.to_uppercase(),
        path,
        timestamp,
        canonical_json(body)
    )
}

/// Sign an API request with the node identity.
pub fn sign_request(keypair: &NodeKeypair, method: &str, path: &str, body: &Value) -> SignedHeaders {
    let timestamp = unix_now();
    let payload = request_payload(method, path, timestamp, body);
    SignedHeaders {
        pubkey: keypair.node_id(),
        timestamp: timestamp.to_string(),
        signature: keypair.sign_hex(payload.as_bytes()),
    }
}

/// Verify an inbound signed request.
///
/// `now` is injected so the replay window is testable.
pub fn verify_request(
    pubkey_hex: &str,
    timestamp_str: &str,
    signature_hex: &str,
    method: &str,
    path: &str,
    body: &Value,
    now: u64,
) -> Result<(), AuthError> {
    if pubkey_hex.is_empty() || timestamp_str.is_empty() || signature_hex.is_empty() {
        return Err(AuthError::MissingHeaders);
    }

    let timestamp: u64 = timestamp_str.parse().map_err(|_| AuthError::BadTimestamp)?;
    if now.abs_diff(timestamp) > REPLAY_WINDOW_SECS {
        return Err(AuthError::Expired);
    }

    if hex::decode(pubkey_hex).map(|b| b.len()) != Ok(32) {
        return Err(AuthError::UnknownKey);
    }

    let payload = request_payload(method, path, timestamp, body);
    if !verify_signature(pubkey_hex, payload.as_bytes(), signature_hex) {
        return Err(AuthError::BadSignature);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn signed(method: &str, path: &str, body: &Value) -> (NodeKeypair, SignedHeaders) {
        let kp = NodeKeypair::generate().unwrap();
        let headers = sign_request(&kp, method, path, body);
        (kp, headers)
    }

    #[test]
    fn test_valid_request_verifies() {
        let body = json!({"title": "test", "amount": 5});
        let (_, h) = signed("post", "/api/tx", &body);
        verify_request(&h.pubkey, &h.timestamp, &h.signature, "POST", "/api/tx", &body, unix_now())
            .unwrap();
    }

    #[test]
    fn test_body_key_order_does_not_matter() {
        let body = json!({"b": 1, "a": 2});
        let reordered = json!({"a": 2, "b": 1});
        let (_, h) = signed("POST", "/api/tx", &body);
        verify_request(
            &h.pubkey, &h.timestamp, &h.signature, "POST", "/api/tx", &reordered, unix_now(),
        )
        .unwrap();
    }

    #[test]
    fn test_stale_timestamp_is_expired() {
        let body = json!({});
        let (_, h) = signed("POST", "/api/tx", &body);
        // Evaluate as if 600 seconds have passed
        let later = unix_now() + 600;
        assert_eq!(
            verify_request(&h.pubkey, &h.timestamp, &h.signature, "POST", "/api/tx", &body, later),
            Err(AuthError::Expired)
        );
    }

    #[test]
    fn test_tampered_body_fails() {
        let body = json!({"amount": 5});
        let (_, h) = signed("POST", "/api/tx", &body);
        let tampered = json!({"amount": 50});
        assert_eq!(
            verify_request(
                &h.pubkey, &h.timestamp, &h.signature, "POST", "/api/tx", &tampered, unix_now(),
            ),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn test_method_and_path_are_covered() {
        let body = json!({});
        let (_, h) = signed("POST", "/api/tx", &body);
        assert_eq!(
            verify_request(&h.pubkey, &h.timestamp, &h.signature, "POST", "/api/peers", &body, unix_now()),
            Err(AuthError::BadSignature)
        );
        assert_eq!(
            verify_request(&h.pubkey, &h.timestamp, &h.signature, "DELETE", "/api/tx", &body, unix_now()),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn test_missing_headers_and_bad_key() {
        let body = json!({});
        assert_eq!(
            verify_request("", "1", "00", "POST", "/p", &body, unix_now()),
            Err(AuthError::MissingHeaders)
        );
        let ts = unix_now().to_string();
        assert_eq!(
            verify_request("nothex", &ts, "00", "POST", "/p", &body, unix_now()),
            Err(AuthError::UnknownKey)
        );
    }

    #[test]
    fn test_lowercase_method_signs_as_upper() {
        let body = json!({"x": 1});
        let (_, h) = signed("post", "/api/proposal", &body);
        verify_request(&h.pubkey, &h.timestamp, &h.signature, "POST", "/api/proposal", &body, unix_now())
            .unwrap();
    }
}
