use aes::Aes256;
use cbc::{Decryptor, Encryptor};
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

type Aes256CbcEnc = Encryptor<Aes256>;
type Aes256CbcDec = Decryptor<Aes256>;

pub const IV_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum CbcError {
    #[error("invalid key or IV length for CBC mode: {0}")]
    InvalidLength(#[from] cipher::InvalidLength),
    #[error("ciphertext is not a whole number of blocks")]
    InvalidCiphertext,
    #[error("invalid padding")]
    InvalidPadding,
}

type Result<T> = std::result::Result<T, CbcError>;

/// AES-256-CBC with a caller-supplied IV; the IV is not part of the output.
pub fn encrypt(key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let enc = Aes256CbcEnc::new_from_slices(key, iv)?;
    Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

pub fn decrypt(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % 16 != 0 {
        return Err(CbcError::InvalidCiphertext);
    }
    Aes256CbcDec::new_from_slices(key, iv)?
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CbcError::InvalidPadding)
}

/// AES-256-CBC with a fresh random IV prefixed to the ciphertext.
pub fn encrypt_with_random_iv(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    let mut out = iv.to_vec();
    out.extend_from_slice(&encrypt(key, &iv, plaintext)?);
    Ok(out)
}

/// Inverse of [`encrypt_with_random_iv`]: the first 16 bytes are the IV.
pub fn decrypt_with_prefixed_iv(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < IV_LEN {
        return Err(CbcError::InvalidCiphertext);
    }
    let (iv, ciphertext) = data.split_at(IV_LEN);
    decrypt(key, iv, ciphertext)
}
