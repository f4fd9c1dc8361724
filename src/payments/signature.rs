use hmac::{Hmac, Mac};
use sha2::Sha512;
use subtle::ConstantTimeEq;

type HmacSha512 = Hmac<Sha512>;

/// Header the provider signs every webhook delivery with
pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

/// Checks a webhook body against the hex HMAC-SHA512 the provider sent.
///
/// `body` must be the raw request bytes, never a re-serialized copy. An empty
/// secret fails every check.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }

    let expected = sign(secret, body);
    let supplied = signature.trim().to_ascii_lowercase();

    expected.as_bytes().ct_eq(supplied.as_bytes()).into()
}

/// Hex HMAC-SHA512 of `body` under `secret`
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match HmacSha512::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk_test_secret";
    const BODY: &[u8] = br#"{"event":"charge.success","data":{"reference":"ref_1","amount":150000}}"#;

    #[test]
    fn test_valid_signature_accepted() {
        let signature = sign(SECRET, BODY);
        assert_eq!(signature.len(), 128);
        assert!(verify_webhook_signature(SECRET, BODY, &signature));
        assert!(verify_webhook_signature(SECRET, BODY, &signature.to_uppercase()));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let signature = sign(SECRET, BODY);
        let tampered = br#"{"event":"charge.success","data":{"reference":"ref_1","amount":990000}}"#;
        assert!(!verify_webhook_signature(SECRET, tampered, &signature));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let signature = sign("another_secret", BODY);
        assert!(!verify_webhook_signature(SECRET, BODY, &signature));
    }

    #[test]
    fn test_empty_secret_never_verifies() {
        let signature = sign("", BODY);
        assert!(!verify_webhook_signature("", BODY, &signature));
        assert!(!verify_webhook_signature("", BODY, ""));
    }

    #[test]
    fn test_garbage_signature_rejected() {
        assert!(!verify_webhook_signature(SECRET, BODY, ""));
        assert!(!verify_webhook_signature(SECRET, BODY, "not-hex"));
    }
}
