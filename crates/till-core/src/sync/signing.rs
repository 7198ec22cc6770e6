//! Device signature for outbound operations
//!
//! A keyed SHA-256 digest over the pairing secret, the operation id, and
//! the payload bytes. The backend recomputes the digest with the secret it
//! issued at pairing time; a mismatch rejects the envelope.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Sign one operation envelope.
pub fn sign_operation(signing_secret: &str, operation_id: Uuid, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(signing_secret.as_bytes());
    hasher.update(operation_id.as_bytes());
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_stable() {
        let id = Uuid::new_v4();
        let a = sign_operation("secret", id, r#"{"total":10.85}"#);
        let b = sign_operation("secret", id, r#"{"total":10.85}"#);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_signature_depends_on_every_input() {
        let id = Uuid::new_v4();
        let base = sign_operation("secret", id, "{}");
        assert_ne!(base, sign_operation("other", id, "{}"));
        assert_ne!(base, sign_operation("secret", Uuid::new_v4(), "{}"));
        assert_ne!(base, sign_operation("secret", id, r#"{"n":1}"#));
    }
}
