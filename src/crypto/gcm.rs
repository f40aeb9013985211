use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::Aes256Gcm;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GcmError {
    #[error("invalid key or nonce size for AES-GCM")]
    InvalidSize,
    #[error("AES-GCM cipher operation failed")]
    CipherError,
}

type Result<T> = std::result::Result<T, GcmError>;

/// Builds an AES-256-GCM cipher for repeated use under one key.
pub fn prepare(secret_key: &[u8]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(secret_key).map_err(|_| GcmError::InvalidSize)
}

pub fn encrypt(secret_key: &[u8], iv: &[u8], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    prepare(secret_key)?
        .encrypt(
            aes_gcm::Nonce::from_slice(iv),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| GcmError::CipherError)
}

pub fn decrypt(secret_key: &[u8], iv: &[u8], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
    prepare(secret_key)?
        .decrypt(
            aes_gcm::Nonce::from_slice(iv),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| GcmError::CipherError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_with_aad() {
        let key = [5u8; 32];
        let iv = [0u8; 12];
        let ciphertext = encrypt(&key, &iv, b"frame payload", b"transcript").unwrap();
        assert_eq!(
            decrypt(&key, &iv, &ciphertext, b"transcript").unwrap(),
            b"frame payload"
        );
    }

    #[test]
    fn test_aad_mismatch_fails() {
        let key = [5u8; 32];
        let iv = [0u8; 12];
        let ciphertext = encrypt(&key, &iv, b"frame payload", b"transcript").unwrap();
        assert!(decrypt(&key, &iv, &ciphertext, b"other").is_err());
    }
}
