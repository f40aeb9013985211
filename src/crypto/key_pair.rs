use crate::crypto::xed25519;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;
use x25519_dalek::{PublicKey, StaticSecret};

/// The Signal DJB key-type marker; prefixed to public keys where the wire
/// format expects a "signal pub key".
pub const DJB_TYPE: u8 = 5;

/// An X25519 key pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPair {
    pub public_key: [u8; 32],
    pub private_key: [u8; 32],
}

impl KeyPair {
    /// Generates a new random key pair.
    pub fn new() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        Self::from_private_key(seed)
    }

    /// Derives the key pair for an existing 32-byte private key.
    pub fn from_private_key(private_key: [u8; 32]) -> Self {
        let private = StaticSecret::from(private_key);
        let public = PublicKey::from(&private);
        Self {
            public_key: *public.as_bytes(),
            private_key: private.to_bytes(),
        }
    }

    /// X25519 shared secret with a raw peer public key.
    pub fn dh(&self, their_public: &[u8; 32]) -> [u8; 32] {
        let secret = StaticSecret::from(self.private_key);
        *secret.diffie_hellman(&PublicKey::from(*their_public)).as_bytes()
    }

    /// Signs another key pair's public key, prefixed with the DJB type byte
    /// as the Signal protocol requires.
    pub fn sign_key(&self, key_to_sign: &KeyPair) -> [u8; 64] {
        let mut message = [0u8; 33];
        message[0] = DJB_TYPE;
        message[1..].copy_from_slice(&key_to_sign.public_key);
        self.sign_message(&message)
    }

    /// XEd25519 signature over an arbitrary message.
    pub fn sign_message(&self, message: &[u8]) -> [u8; 64] {
        xed25519::sign(&self.private_key, message)
    }

    /// Creates a signed pre-key record signed by this (identity) key pair.
    pub fn create_signed_pre_key(&self, key_id: u32) -> SignedPreKey {
        let key_pair = KeyPair::new();
        let signature = self.sign_key(&key_pair);
        SignedPreKey {
            key_id,
            key_pair,
            signature,
        }
    }
}

impl Default for KeyPair {
    fn default() -> Self {
        Self::new()
    }
}

/// A single-use pre-key, stored under `pre-key/<id>` until a peer consumes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreKey {
    pub key_id: u32,
    pub key_pair: KeyPair,
}

impl PreKey {
    pub fn new(key_id: u32) -> Self {
        Self {
            key_id,
            key_pair: KeyPair::new(),
        }
    }
}

/// Medium-lived pre-key signed by the identity key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedPreKey {
    pub key_id: u32,
    pub key_pair: KeyPair,
    #[serde(with = "BigArray")]
    pub signature: [u8; 64],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dh_agreement_is_symmetric() {
        let a = KeyPair::new();
        let b = KeyPair::new();
        assert_eq!(a.dh(&b.public_key), b.dh(&a.public_key));
    }

    #[test]
    fn test_from_private_key_is_deterministic() {
        let a = KeyPair::new();
        let b = KeyPair::from_private_key(a.private_key);
        assert_eq!(a.public_key, b.public_key);
    }

    #[test]
    fn test_signed_pre_key_verifies() {
        let identity = KeyPair::new();
        let spk = identity.create_signed_pre_key(1);

        let mut message = [0u8; 33];
        message[0] = DJB_TYPE;
        message[1..].copy_from_slice(&spk.key_pair.public_key);
        assert!(crate::crypto::xed25519::verify(
            &identity.public_key,
            &message,
            &spk.signature
        ));
    }
}
