//! Drives the Noise XX handshake over the frame socket: client hello out,
//! server hello in, certificate check, client finish with the encrypted
//! login/registration payload.

use crate::config::ClientConfig;
use crate::crypto::KeyPair;
use crate::proto::{CertChain, ClientFinish, ClientHello, HandshakeMessage, NoiseCertificateDetails};
use crate::socket::consts::{NOISE_START_PATTERN, WA_CONN_HEADER};
use crate::socket::error::SocketError;
use crate::socket::{FrameSocket, NoiseHandshake};
use crate::store::clientpayload::build_handshake_payload;
use crate::store::creds::Creds;
use aes_gcm::Aes256Gcm;
use bytes::Bytes;
use log::{debug, info};
use prost::Message;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::Receiver;
use tokio::time::timeout;

const HANDSHAKE_RESPONSE_TIMEOUT: Duration = Duration::from_secs(20);

const CERT_ISSUER_SERIAL: u32 = 0;

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("protobuf decode error: {0}")]
    ProtoDecode(#[from] prost::DecodeError),
    #[error("handshake response is missing required parts")]
    IncompleteResponse,
    #[error("unexpected length for {name}: expected {expected}, got {got}")]
    InvalidLength {
        name: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("server certificate verification failed: {0}")]
    CertVerification(String),
    #[error("timed out waiting for the server hello")]
    Timeout,
    #[error("socket closed during handshake")]
    SocketClosed,
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
}

type Result<T> = std::result::Result<T, HandshakeError>;

fn as_key(name: &'static str, bytes: Vec<u8>) -> Result<[u8; 32]> {
    let got = bytes.len();
    bytes.try_into().map_err(|_| HandshakeError::InvalidLength {
        name,
        expected: 32,
        got,
    })
}

/// The decrypted ServerHello payload is a certificate chain; the leaf must
/// vouch for the static key the server just proved ownership of.
fn verify_server_cert(cert_bytes: &[u8], server_static: &[u8; 32]) -> Result<()> {
    let chain = CertChain::decode(cert_bytes)?;

    let intermediate = chain
        .intermediate
        .ok_or_else(|| HandshakeError::CertVerification("missing intermediate cert".into()))?;
    let leaf = chain
        .leaf
        .ok_or_else(|| HandshakeError::CertVerification("missing leaf cert".into()))?;

    let intermediate_details = NoiseCertificateDetails::decode(
        intermediate
            .details
            .as_deref()
            .ok_or_else(|| HandshakeError::CertVerification("missing intermediate details".into()))?,
    )?;
    if intermediate_details.issuer_serial() != CERT_ISSUER_SERIAL {
        return Err(HandshakeError::CertVerification(format!(
            "unexpected intermediate issuer serial {}",
            intermediate_details.issuer_serial()
        )));
    }

    let leaf_details = NoiseCertificateDetails::decode(
        leaf.details
            .as_deref()
            .ok_or_else(|| HandshakeError::CertVerification("missing leaf details".into()))?,
    )?;
    if leaf_details.issuer_serial() != intermediate_details.serial() {
        return Err(HandshakeError::CertVerification(format!(
            "leaf issuer serial {} does not match intermediate serial {}",
            leaf_details.issuer_serial(),
            intermediate_details.serial()
        )));
    }

    if leaf_details.key() != server_static.as_slice() {
        return Err(HandshakeError::CertVerification(
            "certificate key does not match the server static key".into(),
        ));
    }
    Ok(())
}

/// Runs the full XX exchange and yields the established (write, read)
/// transport keys.
pub(crate) async fn do_handshake(
    creds: &Creds,
    config: &ClientConfig,
    frame_socket: &FrameSocket,
    frames_rx: &mut Receiver<Bytes>,
) -> Result<(Aes256Gcm, Aes256Gcm)> {
    let ephemeral = KeyPair::new();
    let mut noise = NoiseHandshake::new(NOISE_START_PATTERN, &WA_CONN_HEADER)?;
    noise.authenticate(&ephemeral.public_key);

    let client_hello = HandshakeMessage {
        client_hello: Some(ClientHello {
            ephemeral: Some(ephemeral.public_key.to_vec()),
            ..Default::default()
        }),
        ..Default::default()
    };
    debug!(target: "Client", "--> client hello");
    frame_socket.send_frame(&client_hello.encode_to_vec()).await?;

    let response = timeout(HANDSHAKE_RESPONSE_TIMEOUT, frames_rx.recv())
        .await
        .map_err(|_| HandshakeError::Timeout)?
        .ok_or(HandshakeError::SocketClosed)?;

    let server_hello = HandshakeMessage::decode(response.as_ref())?
        .server_hello
        .ok_or(HandshakeError::IncompleteResponse)?;
    let server_ephemeral = as_key(
        "server ephemeral key",
        server_hello
            .ephemeral
            .ok_or(HandshakeError::IncompleteResponse)?,
    )?;
    let static_ciphertext = server_hello
        .r#static
        .ok_or(HandshakeError::IncompleteResponse)?;
    let cert_ciphertext = server_hello
        .payload
        .ok_or(HandshakeError::IncompleteResponse)?;
    debug!(target: "Client", "<-- server hello");

    noise.authenticate(&server_ephemeral);
    noise.mix_shared_secret(&ephemeral.private_key, &server_ephemeral)?;

    let server_static = as_key("server static key", noise.decrypt(&static_ciphertext)?)?;
    noise.mix_shared_secret(&ephemeral.private_key, &server_static)?;

    let cert_plaintext = noise.decrypt(&cert_ciphertext)?;
    verify_server_cert(&cert_plaintext, &server_static)?;

    let encrypted_static = noise.encrypt(&creds.noise_key.public_key)?;
    noise.mix_shared_secret(&creds.noise_key.private_key, &server_ephemeral)?;
    let encrypted_payload = noise.encrypt(&build_handshake_payload(creds, config))?;

    let client_finish = HandshakeMessage {
        client_finish: Some(ClientFinish {
            r#static: Some(encrypted_static),
            payload: Some(encrypted_payload),
        }),
        ..Default::default()
    };
    debug!(target: "Client", "--> client finish");
    frame_socket.send_frame(&client_finish.encode_to_vec()).await?;

    info!(target: "Client", "handshake complete, switching to transport encryption");
    Ok(noise.finish()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::NoiseCertificate;

    fn details(serial: u32, issuer: u32, key: &[u8]) -> Vec<u8> {
        NoiseCertificateDetails {
            serial: Some(serial),
            issuer_serial: Some(issuer),
            key: Some(key.to_vec()),
            ..Default::default()
        }
        .encode_to_vec()
    }

    fn chain(leaf_key: &[u8]) -> Vec<u8> {
        CertChain {
            intermediate: Some(NoiseCertificate {
                details: Some(details(7, CERT_ISSUER_SERIAL, &[0u8; 32])),
                signature: Some(vec![0u8; 64]),
            }),
            leaf: Some(NoiseCertificate {
                details: Some(details(8, 7, leaf_key)),
                signature: Some(vec![0u8; 64]),
            }),
        }
        .encode_to_vec()
    }

    #[test]
    fn test_cert_accepts_matching_leaf_key() {
        let server_static = [9u8; 32];
        assert!(verify_server_cert(&chain(&server_static), &server_static).is_ok());
    }

    #[test]
    fn test_cert_rejects_key_mismatch() {
        let server_static = [9u8; 32];
        let err = verify_server_cert(&chain(&[1u8; 32]), &server_static).unwrap_err();
        assert!(matches!(err, HandshakeError::CertVerification(_)));
    }

    #[test]
    fn test_cert_rejects_broken_issuer_chain() {
        let server_static = [9u8; 32];
        let bad = CertChain {
            intermediate: Some(NoiseCertificate {
                details: Some(details(7, CERT_ISSUER_SERIAL, &[0u8; 32])),
                signature: Some(vec![0u8; 64]),
            }),
            leaf: Some(NoiseCertificate {
                details: Some(details(8, 99, &server_static)),
                signature: Some(vec![0u8; 64]),
            }),
        }
        .encode_to_vec();
        assert!(verify_server_cert(&bad, &server_static).is_err());
    }
}
