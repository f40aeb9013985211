use xeddsa::xed25519::{PrivateKey, PublicKey};

/// XEd25519 signature with an X25519 private key.
pub fn sign(private_key: &[u8; 32], message: &[u8]) -> [u8; 64] {
    let key = PrivateKey(*private_key);
    <PrivateKey as xeddsa::xeddsa::Sign<[u8; 64], [u8; 32], [u8; 32]>>::sign(
        &key,
        message,
        rand10::rng(),
    )
}

/// Verifies an XEd25519 signature against an X25519 public key.
pub fn verify(public_key: &[u8; 32], message: &[u8], signature: &[u8; 64]) -> bool {
    let key = PublicKey(*public_key);
    <PublicKey as xeddsa::xeddsa::Verify<[u8; 64], [u8; 32]>>::verify(&key, message, signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_pair::KeyPair;

    #[test]
    fn test_sign_verify_roundtrip() {
        let pair = KeyPair::new();
        let message = b"companion device registration payload";
        let signature = sign(&pair.private_key, message);
        assert!(verify(&pair.public_key, message, &signature));
    }

    #[test]
    fn test_tampered_message_fails() {
        let pair = KeyPair::new();
        let signature = sign(&pair.private_key, b"original");
        assert!(!verify(&pair.public_key, b"tampered", &signature));
    }

    #[test]
    fn test_wrong_key_fails() {
        let pair = KeyPair::new();
        let other = KeyPair::new();
        let signature = sign(&pair.private_key, b"message");
        assert!(!verify(&other.public_key, b"message", &signature));
    }
}
