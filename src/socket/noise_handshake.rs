use crate::crypto::{gcm, hkdf};
use crate::socket::error::{Result, SocketError};
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::Aes256Gcm;
use sha2::{Digest, Sha256};
use x25519_dalek::{x25519, StaticSecret};

pub fn sha256_slice(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// 12-byte GCM IV whose trailing 4 bytes are the big-endian frame counter.
pub fn generate_iv(counter: u32) -> [u8; 12] {
    let mut iv = [0u8; 12];
    iv[8..].copy_from_slice(&counter.to_be_bytes());
    iv
}

/// The symmetric half of the Noise XX handshake: transcript hash, chaining
/// salt, and the current AEAD key. Each key mix resets the nonce counter.
pub struct NoiseHandshake {
    hash: [u8; 32],
    salt: [u8; 32],
    key: Aes256Gcm,
    counter: u32,
}

impl NoiseHandshake {
    pub fn hash(&self) -> &[u8; 32] {
        &self.hash
    }

    pub fn new(pattern: &str, header: &[u8]) -> Result<Self> {
        let h: [u8; 32] = if pattern.len() == 32 {
            pattern.as_bytes().try_into().unwrap()
        } else {
            sha256_slice(pattern.as_bytes())
        };

        let mut state = Self {
            hash: h,
            salt: h,
            key: gcm::prepare(&h).map_err(|e| SocketError::Crypto(e.to_string()))?,
            counter: 0,
        };
        state.authenticate(header);
        Ok(state)
    }

    /// Mixes data into the transcript hash without encrypting it.
    pub fn authenticate(&mut self, data: &[u8]) {
        let mut hasher = Sha256::new();
        hasher.update(self.hash);
        hasher.update(data);
        self.hash = hasher.finalize().into();
    }

    fn next_counter(&mut self) -> u32 {
        let count = self.counter;
        self.counter += 1;
        count
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let iv = generate_iv(self.next_counter());
        let ciphertext = self
            .key
            .encrypt(
                iv.as_ref().into(),
                Payload {
                    msg: plaintext,
                    aad: &self.hash,
                },
            )
            .map_err(|e| SocketError::Crypto(e.to_string()))?;
        self.authenticate(&ciphertext);
        Ok(ciphertext)
    }

    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        // The transcript hash before this message is the AAD; it is only
        // advanced once decryption succeeds.
        let aad = self.hash;
        let iv = generate_iv(self.next_counter());
        let plaintext = self
            .key
            .decrypt(
                iv.as_ref().into(),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|e| SocketError::Crypto(format!("noise decrypt failed: {e}")))?;
        self.authenticate(ciphertext);
        Ok(plaintext)
    }

    pub fn mix_into_key(&mut self, data: &[u8]) -> Result<()> {
        self.counter = 0;
        let (write, read) = self.extract_and_expand(Some(data))?;
        self.salt = write;
        self.key = gcm::prepare(&read).map_err(|e| SocketError::Crypto(e.to_string()))?;
        Ok(())
    }

    pub fn mix_shared_secret(&mut self, private_key: &[u8; 32], public_key: &[u8; 32]) -> Result<()> {
        let secret = StaticSecret::from(*private_key);
        let shared = x25519(secret.to_bytes(), *public_key);
        self.mix_into_key(&shared)
    }

    fn extract_and_expand(&self, ikm: Option<&[u8]>) -> Result<([u8; 32], [u8; 32])> {
        let okm = hkdf::sha256(ikm.unwrap_or(&[]), Some(&self.salt), &[], 64)
            .map_err(|e| SocketError::Crypto(e.to_string()))?;

        let mut write = [0u8; 32];
        let mut read = [0u8; 32];
        write.copy_from_slice(&okm[..32]);
        read.copy_from_slice(&okm[32..]);
        Ok((write, read))
    }

    /// Consumes the handshake, producing the (write, read) transport keys.
    pub fn finish(self) -> Result<(Aes256Gcm, Aes256Gcm)> {
        let (write_bytes, read_bytes) = self.extract_and_expand(None)?;
        let write_key = gcm::prepare(&write_bytes).map_err(|e| SocketError::Crypto(e.to_string()))?;
        let read_key = gcm::prepare(&read_bytes).map_err(|e| SocketError::Crypto(e.to_string()))?;
        Ok((write_key, read_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::consts::{NOISE_START_PATTERN, WA_CONN_HEADER};

    #[test]
    fn test_iv_layout() {
        let iv = generate_iv(0x01020304);
        assert_eq!(&iv[..8], &[0; 8]);
        assert_eq!(&iv[8..], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_pattern_of_32_bytes_is_used_directly() {
        assert_eq!(NOISE_START_PATTERN.len(), 32);
        let state = NoiseHandshake::new(NOISE_START_PATTERN, &WA_CONN_HEADER).unwrap();
        let expected = sha256_slice(
            &[NOISE_START_PATTERN.as_bytes(), &WA_CONN_HEADER[..]].concat(),
        );
        assert_eq!(*state.hash(), expected);
    }

    #[test]
    fn test_transcripts_diverge_on_different_header() {
        let a = NoiseHandshake::new(NOISE_START_PATTERN, &WA_CONN_HEADER).unwrap();
        let b = NoiseHandshake::new(NOISE_START_PATTERN, b"XX\x00\x00").unwrap();
        assert_ne!(a.hash(), b.hash());
    }
}
