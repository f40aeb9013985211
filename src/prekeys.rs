//! Pre-key maintenance: batch generation, the upload request, and the
//! top-up check after login.
//!
//! ## Upload wire format
//! ```xml
//! <iq xmlns="encrypt" type="set" to="s.whatsapp.net" id="...">
//!   <registration>[4-byte BE registration id]</registration>
//!   <type>[1 byte: 5]</type>
//!   <identity>[32-byte identity public key]</identity>
//!   <list>
//!     <key><id>[3-byte BE key id]</id><value>[32-byte public key]</value></key>
//!     ...
//!   </list>
//!   <skey>
//!     <id>[3-byte BE signed pre-key id]</id>
//!     <value>[32-byte public key]</value>
//!     <signature>[64-byte signature]</signature>
//!   </skey>
//! </iq>
//! ```
//!
//! ## Count wire format
//! ```xml
//! <iq xmlns="encrypt" type="get" to="s.whatsapp.net" id="..."><count/></iq>
//! <iq from="s.whatsapp.net" id="..." type="result"><count value="42"/></iq>
//! ```

use crate::binary::jid::Jid;
use crate::binary::node::{Node, NodeContent};
use crate::binary::NodeBuilder;
use crate::client::Client;
use crate::crypto::{KeyPair, PreKey, SignedPreKey};
use crate::error::WaError;
use crate::request::InfoQuery;
use crate::store::creds::CredsUpdate;
use crate::store::traits::{WriteOp, CATEGORY_CREDS, CATEGORY_PRE_KEY, CREDS_RECORD_ID};
use log::{info, warn};

/// Server pool threshold below which a fresh batch is uploaded.
pub const MIN_PREKEY_COUNT: u64 = 30;
/// Batch size for uploads.
pub const UPLOAD_PREKEY_COUNT: u32 = 30;

fn key_id_bytes(id: u32) -> Vec<u8> {
    id.to_be_bytes()[1..].to_vec()
}

fn one_time_key_node(key: &PreKey) -> Node {
    NodeBuilder::new("key")
        .children([
            NodeBuilder::new("id").bytes(key_id_bytes(key.key_id)).build(),
            NodeBuilder::new("value")
                .bytes(key.key_pair.public_key.to_vec())
                .build(),
        ])
        .build()
}

fn signed_key_node(signed: &SignedPreKey) -> Node {
    NodeBuilder::new("skey")
        .children([
            NodeBuilder::new("id")
                .bytes(key_id_bytes(signed.key_id))
                .build(),
            NodeBuilder::new("value")
                .bytes(signed.key_pair.public_key.to_vec())
                .build(),
            NodeBuilder::new("signature")
                .bytes(signed.signature.to_vec())
                .build(),
        ])
        .build()
}

fn build_upload_content(
    registration_id: u32,
    identity_key: &KeyPair,
    signed_pre_key: &SignedPreKey,
    keys: &[PreKey],
) -> Vec<Node> {
    vec![
        NodeBuilder::new("registration")
            .bytes(registration_id.to_be_bytes().to_vec())
            .build(),
        NodeBuilder::new("type")
            .bytes(vec![crate::crypto::key_pair::DJB_TYPE])
            .build(),
        NodeBuilder::new("identity")
            .bytes(identity_key.public_key.to_vec())
            .build(),
        NodeBuilder::new("list")
            .children(keys.iter().map(one_time_key_node))
            .build(),
        signed_key_node(signed_pre_key),
    ]
}

impl Client {
    /// Asks the server how many one-time pre-keys it still holds for us.
    pub async fn server_prekey_count(&self) -> Result<u64, WaError> {
        let response = self
            .send_iq(InfoQuery::get(
                "encrypt",
                Jid::server_jid(),
                Some(NodeContent::Nodes(vec![NodeBuilder::new("count").build()])),
            ))
            .await?;

        let count = response
            .get_optional_child("count")
            .and_then(|n| n.attrs().optional_u64("value"))
            .unwrap_or(0);
        Ok(count)
    }

    /// Allocates `range` fresh pre-keys, persists them together with the
    /// advanced counters in one atomic batch, announces the counter move, and
    /// uploads the batch.
    pub async fn upload_prekeys(&self, range: u32) -> Result<(), anyhow::Error> {
        let (keys, first_id, next_id) = {
            let creds = self.creds.lock().await;
            let first_id = creds.next_pre_key_id;
            let keys: Vec<PreKey> = (first_id..first_id + range).map(PreKey::new).collect();
            let next_id = first_id + range;

            let mut ops: Vec<WriteOp> = Vec::with_capacity(keys.len() + 1);
            for key in &keys {
                let record = serde_json::to_vec(key)?;
                ops.push(WriteOp::put(CATEGORY_PRE_KEY, key.key_id.to_string(), record));
            }

            // Key records and counter moves land in one batch: either the
            // keys exist and the counters advanced, or neither happened.
            let mut updated = creds.clone();
            updated.next_pre_key_id = next_id;
            updated.first_unuploaded_pre_key_id = next_id;
            ops.push(WriteOp::put(
                CATEGORY_CREDS,
                CREDS_RECORD_ID,
                serde_json::to_vec(&updated)?,
            ));

            self.backend.set_batch(ops).await?;
            (keys, first_id, next_id)
        };

        self.persist_creds_update(CredsUpdate {
            next_pre_key_id: Some(next_id),
            first_unuploaded_pre_key_id: Some(next_id),
            ..Default::default()
        })
        .await;

        let (registration_id, identity_key, signed_pre_key) = {
            let creds = self.creds.lock().await;
            (
                creds.registration_id,
                creds.identity_key.clone(),
                creds.signed_pre_key.clone(),
            )
        };
        let content = build_upload_content(registration_id, &identity_key, &signed_pre_key, &keys);

        self.send_iq(InfoQuery::set(
            "encrypt",
            Jid::server_jid(),
            Some(NodeContent::Nodes(content)),
        ))
        .await?;

        info!(
            target: "Client",
            "uploaded {range} pre-keys (ids {first_id}..{})", next_id - 1
        );
        Ok(())
    }

    /// Post-login top-up: refill the server pool when it runs low.
    pub(crate) async fn top_up_prekeys(&self) {
        match self.server_prekey_count().await {
            Ok(count) if count <= MIN_PREKEY_COUNT => {
                info!(target: "Client", "server holds {count} pre-keys, uploading more");
                if let Err(e) = self.upload_prekeys(UPLOAD_PREKEY_COUNT).await {
                    warn!(target: "Client", "pre-key upload failed: {e}");
                }
            }
            Ok(count) => {
                info!(target: "Client", "server holds {count} pre-keys, no top-up needed");
            }
            Err(e) => {
                warn!(target: "Client", "pre-key count query failed: {e}");
            }
        }
    }
}
