use crate::socket::error::{Result, SocketError};
use crate::socket::frame_socket::FrameSocket;
use crate::socket::noise_handshake::generate_iv;
use aes_gcm::aead::Aead;
use aes_gcm::Aes256Gcm;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Post-handshake transport: every frame payload is AEAD-sealed under the
/// established cipher states, with independent monotonic counters per
/// direction. Counters never repeat under one session key.
pub struct NoiseSocket {
    frame_socket: Arc<FrameSocket>,
    write_key: Aes256Gcm,
    read_key: Aes256Gcm,
    write_counter: AtomicU32,
    read_counter: AtomicU32,
}

impl NoiseSocket {
    pub fn new(frame_socket: Arc<FrameSocket>, write_key: Aes256Gcm, read_key: Aes256Gcm) -> Self {
        Self {
            frame_socket,
            write_key,
            read_key,
            write_counter: AtomicU32::new(0),
            read_counter: AtomicU32::new(0),
        }
    }

    pub fn encrypt_frame(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let counter = self.write_counter.fetch_add(1, Ordering::SeqCst);
        let iv = generate_iv(counter);
        self.write_key
            .encrypt(iv.as_ref().into(), plaintext)
            .map_err(|e| SocketError::Crypto(e.to_string()))
    }

    pub fn decrypt_frame(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let counter = self.read_counter.fetch_add(1, Ordering::SeqCst);
        let iv = generate_iv(counter);
        self.read_key
            .decrypt(iv.as_ref().into(), ciphertext)
            .map_err(|e| SocketError::Crypto(e.to_string()))
    }

    /// Seals and sends one plaintext payload as a frame.
    pub async fn send_frame(&self, plaintext: &[u8]) -> Result<()> {
        let ciphertext = self.encrypt_frame(plaintext)?;
        self.frame_socket.send_frame(&ciphertext).await
    }

    pub async fn close(&self) {
        self.frame_socket.close().await;
    }

    pub async fn is_connected(&self) -> bool {
        self.frame_socket.is_connected().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aes_gcm::KeyInit;

    fn key_pair_under_test() -> (Aes256Gcm, Aes256Gcm) {
        let write = Aes256Gcm::new_from_slice(&[1u8; 32]).unwrap();
        let read = Aes256Gcm::new_from_slice(&[1u8; 32]).unwrap();
        (write, read)
    }

    fn socket_under_test() -> NoiseSocket {
        let (frame_socket, _rx) = FrameSocket::new();
        let (write, read) = key_pair_under_test();
        NoiseSocket::new(Arc::new(frame_socket), write, read)
    }

    #[test]
    fn test_sealed_frames_roundtrip_in_order() {
        let sender = socket_under_test();
        let receiver = socket_under_test();

        for payload in [&b"first"[..], b"second", b"third"] {
            let sealed = sender.encrypt_frame(payload).unwrap();
            assert_eq!(receiver.decrypt_frame(&sealed).unwrap(), payload);
        }
    }

    #[test]
    fn test_reordered_frame_is_rejected() {
        let sender = socket_under_test();
        let receiver = socket_under_test();

        let first = sender.encrypt_frame(b"first").unwrap();
        let second = sender.encrypt_frame(b"second").unwrap();

        // Delivering the second frame first desynchronizes the counter.
        assert!(receiver.decrypt_frame(&second).is_err());
        let _ = first;
    }

    #[test]
    fn test_duplicated_frame_is_rejected() {
        let sender = socket_under_test();
        let receiver = socket_under_test();

        let sealed = sender.encrypt_frame(b"once").unwrap();
        assert!(receiver.decrypt_frame(&sealed).is_ok());
        assert!(receiver.decrypt_frame(&sealed).is_err());
    }
}
