//! QR pairing: ref handling, the signed-device-identity verification at
//! `pair-success`, and the acknowledgement hand-off that precedes the
//! server's reconnect signal.

use crate::binary::jid::SERVER_JID;
use crate::binary::node::Node;
use crate::binary::NodeBuilder;
use crate::client::{Client, SessionState};
use crate::crypto::hmac;
use crate::crypto::xed25519;
use crate::error::WaError;
use crate::proto::{AdvDeviceIdentity, AdvEncryptionType, AdvSignedDeviceIdentity, AdvSignedDeviceIdentityHmac};
use crate::qrcode;
use crate::store::creds::{Creds, CredsUpdate, Me};
use crate::types::events::ConnectionUpdate;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use log::{debug, error, info, warn};
use prost::Message;
use std::sync::atomic::Ordering;
use std::sync::Arc;

// Domain-separation prefixes for the identity signatures.
const ADV_PREFIX_ACCOUNT_SIGNATURE: &[u8] = &[6, 0];
const ADV_PREFIX_DEVICE_SIGNATURE: &[u8] = &[6, 1];
const ADV_HOSTED_PREFIX_ACCOUNT_SIGNATURE: &[u8] = &[6, 5];
const ADV_HOSTED_PREFIX_DEVICE_SIGNATURE: &[u8] = &[6, 6];

/// Verification failure at pair-success; `code`/`text` feed the error reply.
#[derive(Debug)]
pub struct PairingError {
    pub code: u16,
    pub text: &'static str,
}

impl std::fmt::Display for PairingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pairing failed with code {}: {}", self.code, self.text)
    }
}

impl std::error::Error for PairingError {}

fn internal_error() -> PairingError {
    PairingError {
        code: 500,
        text: "internal-error",
    }
}

/// The QR string is `ref,noiseKeyB64,identityKeyB64,advSecretB64`.
pub fn make_qr_data(creds: &Creds, ref_str: &str) -> String {
    let noise = BASE64.encode(creds.noise_key.public_key);
    let identity = BASE64.encode(creds.identity_key.public_key);
    let adv = BASE64.encode(creds.adv_secret_key);
    [ref_str, &noise, &identity, &adv].join(",")
}

/// Verifies the server-signed device identity against our ADV secret and
/// identity key, then counter-signs it. Returns the re-encoded identity and
/// its key index for the acknowledgement reply.
pub fn verify_device_identity(
    creds: &Creds,
    device_identity_bytes: &[u8],
) -> Result<(Vec<u8>, u32), PairingError> {
    let container = AdvSignedDeviceIdentityHmac::decode(device_identity_bytes)
        .map_err(|_| internal_error())?;
    let is_hosted = container.account_type() == AdvEncryptionType::Hosted;

    let details = container.details.as_deref().ok_or_else(internal_error)?;
    let mac = container.hmac.as_deref().ok_or_else(internal_error)?;

    let mut mac_parts: Vec<&[u8]> = Vec::with_capacity(2);
    if is_hosted {
        mac_parts.push(ADV_HOSTED_PREFIX_ACCOUNT_SIGNATURE);
    }
    mac_parts.push(details);
    if !hmac::verify_sha256(&creds.adv_secret_key, &mac_parts, mac) {
        return Err(PairingError {
            code: 401,
            text: "hmac-mismatch",
        });
    }

    let mut signed_identity =
        AdvSignedDeviceIdentity::decode(details).map_err(|_| internal_error())?;
    let account_signature_key: [u8; 32] = signed_identity
        .account_signature_key()
        .try_into()
        .map_err(|_| internal_error())?;
    let account_signature: [u8; 64] = signed_identity
        .account_signature()
        .try_into()
        .map_err(|_| internal_error())?;
    let inner_details = signed_identity.details().to_vec();

    let account_prefix = if is_hosted {
        ADV_HOSTED_PREFIX_ACCOUNT_SIGNATURE
    } else {
        ADV_PREFIX_ACCOUNT_SIGNATURE
    };
    let signed_message = [
        account_prefix,
        &inner_details,
        &creds.identity_key.public_key,
    ]
    .concat();
    if !xed25519::verify(&account_signature_key, &signed_message, &account_signature) {
        return Err(PairingError {
            code: 401,
            text: "signature-mismatch",
        });
    }

    let device_prefix = if is_hosted {
        ADV_HOSTED_PREFIX_DEVICE_SIGNATURE
    } else {
        ADV_PREFIX_DEVICE_SIGNATURE
    };
    let message_to_sign = [
        device_prefix,
        &inner_details,
        &creds.identity_key.public_key,
        &account_signature_key,
    ]
    .concat();
    signed_identity.device_signature =
        Some(creds.identity_key.sign_message(&message_to_sign).to_vec());

    let identity_details =
        AdvDeviceIdentity::decode(inner_details.as_slice()).map_err(|_| internal_error())?;

    Ok((signed_identity.encode_to_vec(), identity_details.key_index()))
}

fn build_ack_node(request: &Node) -> Option<Node> {
    let mut parser = request.attrs();
    let from = parser.optional_jid("from")?;
    let id = parser.optional_string("id")?;
    Some(
        NodeBuilder::new("iq")
            .jid_attr("to", from)
            .attr("id", id)
            .attr("type", "result")
            .build(),
    )
}

fn build_pair_error_node(req_id: &str, code: u16, text: &str) -> Node {
    NodeBuilder::new("iq")
        .attr("to", SERVER_JID)
        .attr("type", "error")
        .attr("id", req_id)
        .children([NodeBuilder::new("error")
            .attr("code", code.to_string())
            .attr("text", text)
            .build()])
        .build()
}

fn build_pair_success_reply(req_id: &str, signed_identity: Vec<u8>, key_index: u32) -> Node {
    NodeBuilder::new("iq")
        .attr("to", SERVER_JID)
        .attr("id", req_id)
        .attr("type", "result")
        .children([NodeBuilder::new("pair-device-sign").children([
            NodeBuilder::new("device-identity")
                .attr("key-index", key_index.to_string())
                .bytes(signed_identity)
                .build(),
        ])
        .build()])
        .build()
}

/// Routes pairing-related `iq` stanzas; returns whether the node was one.
pub(crate) async fn handle_iq(client: &Arc<Client>, node: &Node) -> bool {
    if node
        .attrs()
        .optional_string("from")
        .is_none_or(|from| from != SERVER_JID)
    {
        return false;
    }
    let Some(children) = node.children() else {
        return false;
    };

    for child in children {
        match child.tag.as_str() {
            "pair-device" => {
                handle_pair_device(client, node, child).await;
                return true;
            }
            "pair-success" => {
                if client.state() != SessionState::Registering {
                    warn!(
                        target: "Client/Pair",
                        "<pair-success> in state {:?}, ignoring", client.state()
                    );
                    return true;
                }
                handle_pair_success(client, node, child).await;
                return true;
            }
            _ => {}
        }
    }
    false
}

async fn handle_pair_device(client: &Arc<Client>, request: &Node, pair_device: &Node) {
    if let Some(ack) = build_ack_node(request) {
        if let Err(e) = client.send_node(ack).await {
            warn!(target: "Client/Pair", "failed to acknowledge pair-device: {e:?}");
        }
    }

    let creds = client.creds_snapshot().await;
    let mut codes = Vec::new();
    for ref_node in pair_device.get_children_by_tag("ref") {
        if let Some(bytes) = ref_node.content_bytes() {
            if let Ok(ref_str) = std::str::from_utf8(bytes) {
                codes.push(make_qr_data(&creds, ref_str));
            }
        }
    }

    debug!(target: "Client/Pair", "received {} pairing refs", codes.len());
    qrcode::spawn_qr_emitter(client.clone(), codes);
}

async fn handle_pair_success(client: &Arc<Client>, request: &Node, success: &Node) {
    let req_id = match request.attrs().optional_string("id") {
        Some(id) => id,
        None => {
            error!(target: "Client/Pair", "pair-success without a request id");
            return;
        }
    };

    let device_identity_bytes = match success
        .get_optional_child("device-identity")
        .and_then(Node::content_bytes)
    {
        Some(bytes) => bytes.to_vec(),
        None => {
            error!(target: "Client/Pair", "pair-success is missing device-identity");
            let reply = build_pair_error_node(&req_id, 500, "internal-error");
            if let Err(e) = client.send_node(reply).await {
                error!(target: "Client/Pair", "failed to send pair error: {e:?}");
            }
            return;
        }
    };

    let business_name = success
        .get_optional_child("biz")
        .and_then(|n| n.attrs().optional_string("name"))
        .unwrap_or_default();
    let platform = success
        .get_optional_child("platform")
        .and_then(|n| n.attrs().optional_string("name"))
        .unwrap_or_default();
    let jid = success
        .get_optional_child("device")
        .and_then(|n| n.attrs().optional_jid("jid"))
        .unwrap_or_default();

    let creds = client.creds_snapshot().await;
    match verify_device_identity(&creds, &device_identity_bytes) {
        Ok((signed_identity, key_index)) => {
            // The scan happened; the emitter must not announce further codes.
            if let Some(stop) = client.qr_stop.lock().unwrap().take() {
                let _ = stop.send(());
            }

            info!(target: "Client/Pair", "paired as {jid}");
            client
                .persist_creds_update(CredsUpdate {
                    me: Some(Me {
                        jid,
                        name: (!business_name.is_empty()).then(|| business_name.clone()),
                    }),
                    platform: (!platform.is_empty()).then(|| platform.clone()),
                    ..Default::default()
                })
                .await;

            let reply = build_pair_success_reply(&req_id, signed_identity, key_index);
            if let Err(e) = client.send_node(reply).await {
                error!(target: "Client/Pair", "failed to send pairing reply: {e:?}");
                return;
            }

            // The server now tears the stream down with code 515 so the
            // device can reconnect under its new identity.
            client.pair_completed.store(true, Ordering::Relaxed);
            client.emit_connection_update(ConnectionUpdate {
                is_new_login: Some(true),
                ..Default::default()
            });
        }
        Err(e) => {
            error!(target: "Client/Pair", "identity verification failed: {e}");
            let reply = build_pair_error_node(&req_id, e.code, e.text);
            if let Err(send_err) = client.send_node(reply).await {
                error!(target: "Client/Pair", "failed to send pair error: {send_err:?}");
            }
            client.end(Some(WaError::BadSession)).await;
        }
    }
}
