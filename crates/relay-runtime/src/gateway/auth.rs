//! Signature and bearer-token verification for the two webhook sources
//! (§4.8 "GitHub authentication" / "Odoo authentication").
//!
//! Grounded on the teacher's `gateway/auth.rs` (JWT `AuthMiddleware`): same
//! "verify, then let the handler run" shape, but the credential here is an
//! HMAC over the raw body (GitHub) or a shared bearer token (Odoo) rather
//! than a JWT, so `jsonwebtoken` is replaced with `hmac`/`sha2`/`hex`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Constant-time byte comparison — never short-circuits on the first
/// mismatching byte, so response timing can't leak how many prefix bytes of
/// a guessed token or signature are correct.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Verify `X-Hub-Signature-256: sha256=<hex>` against the raw request body.
pub fn verify_github_signature(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_digest) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    constant_time_eq(&computed, &expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"action":"opened"}"#;
        let sig = sign("secret", body);
        assert!(verify_github_signature("secret", body, &sig));
    }

    #[test]
    fn wrong_secret_rejects() {
        let body = br#"{"action":"opened"}"#;
        let sig = sign("other-secret", body);
        assert!(!verify_github_signature("secret", body, &sig));
    }

    #[test]
    fn malformed_header_rejects() {
        assert!(!verify_github_signature("secret", b"body", "not-a-signature"));
    }

    #[test]
    fn constant_time_eq_rejects_length_mismatch() {
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }

    #[test]
    fn constant_time_eq_accepts_equal_slices() {
        assert!(constant_time_eq(b"token123", b"token123"));
    }
}
