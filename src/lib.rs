//! Companion-device client core for the WhatsApp Web protocol.
//!
//! Speaks the service's native WebSocket protocol directly: a Noise XX
//! handshake with per-frame transport encryption, the tagged binary stanza
//! codec, a request/response correlator over the single bidirectional
//! stream, QR pairing, and pre-key maintenance. Higher layers (message
//! payload encryption, feature request builders, media transfer) sit on top
//! of [`Client::query`], [`Client::subscribe`], and the event bus.
//!
//! Reconnection policy is deliberately left to the embedder: the client
//! surfaces disconnects through `connection.update` and is then done.

pub mod binary;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handshake;
mod keepalive;
pub mod pair;
pub mod prekeys;
pub mod proto;
mod qrcode;
pub mod request;
pub mod socket;
pub mod store;
pub mod types;
pub mod version;

pub use binary::{Jid, Node, NodeBuilder};
pub use client::{Client, ClientError, SessionState};
pub use config::{Browser, ClientConfig};
pub use error::WaError;
pub use request::{assert_node_error_free, InfoQuery, InfoQueryType, NodePattern};
pub use store::{Backend, Creds, CredsUpdate, MemoryStore};
pub use types::{ConnectionState, ConnectionUpdate, Event, EventBus, EventKind};
pub use version::ClientVersion;
