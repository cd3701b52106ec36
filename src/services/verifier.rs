// src/services/verifier.rs

//! Webhook signature verification.
//!
//! Each processor signs the exact raw request body with a shared secret
//! (HMAC-SHA256, hex-encoded). Verification must therefore run on the raw
//! bytes captured before any JSON parsing; re-serializing a parsed payload
//! would not reproduce the signed bytes.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compute the hex HMAC-SHA256 of `raw_body` under `shared_secret` and
/// compare it to `provided_signature` in constant time.
///
/// Returns `false` for an empty secret rather than treating "unconfigured"
/// as "anything verifies".
pub fn verify(raw_body: &[u8], provided_signature: &str, shared_secret: &str) -> bool {
  if shared_secret.is_empty() {
    return false;
  }

  // HMAC accepts keys of any length, so new_from_slice cannot fail here.
  let mut mac = match HmacSha256::new_from_slice(shared_secret.as_bytes()) {
    Ok(mac) => mac,
    Err(_) => return false,
  };
  mac.update(raw_body);
  let expected = hex::encode(mac.finalize().into_bytes());

  // Constant-time comparison to prevent timing attacks. A length mismatch
  // short-circuits, which leaks nothing useful (hex digest length is public).
  expected.as_bytes().ct_eq(provided_signature.as_bytes()).into()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
  }

  #[test]
  fn accepts_matching_signature() {
    let body = br#"{"order_id":"abc","status":"paid"}"#;
    let sig = sign(body, "whsec_test");
    assert!(verify(body, &sig, "whsec_test"));
  }

  #[test]
  fn rejects_wrong_secret() {
    let body = b"payload";
    let sig = sign(body, "secret-a");
    assert!(!verify(body, &sig, "secret-b"));
  }

  #[test]
  fn rejects_tampered_body() {
    let sig = sign(b"original body", "whsec_test");
    assert!(!verify(b"tampered body", &sig, "whsec_test"));
  }

  #[test]
  fn rejects_malformed_signature() {
    assert!(!verify(b"payload", "not-hex-at-all", "whsec_test"));
    assert!(!verify(b"payload", "", "whsec_test"));
  }

  #[test]
  fn rejects_empty_secret() {
    // An unconfigured secret must never verify.
    let sig = sign(b"payload", "");
    assert!(!verify(b"payload", &sig, ""));
  }

  #[test]
  fn signature_is_over_exact_bytes() {
    // Whitespace-different JSON of the same document must not verify;
    // the contract is over raw bytes, not parsed structure.
    let compact = br#"{"a":1}"#;
    let pretty = br#"{ "a": 1 }"#;
    let sig = sign(compact, "whsec_test");
    assert!(!verify(pretty, &sig, "whsec_test"));
  }
}
