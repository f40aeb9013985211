use crate::binary::{self, BinaryError};
use crate::binary::builder::NodeBuilder;
use crate::binary::node::Node;
use crate::config::ClientConfig;
use crate::error::WaError;
use crate::handshake;
use crate::pair;
use crate::request::Subscription;
use crate::socket::{FrameSocket, NoiseSocket, SocketError};
use crate::store::creds::{Creds, CredsUpdate};
use crate::store::traits::Backend;
use crate::types::events::{
    ConnectionState, ConnectionUpdate, Event, EventBus, EventKind, LastDisconnect,
};
use base64::engine::general_purpose::STANDARD_NO_PAD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use log::{debug, error, info, warn};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use thiserror::Error;
use tokio::time::Instant;
use tokio::sync::{mpsc, oneshot, watch, Mutex, Notify};

/// Session lifecycle. Transitions only move forward; a client is not
/// reusable after `Closed` — reconnection policy belongs to the embedder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Handshaking,
    LoggingIn,
    Registering,
    Active,
    Closing,
    Closed,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("client is not logged in")]
    NotLoggedIn,
    #[error("socket error: {0}")]
    Socket(#[from] SocketError),
    #[error("encoding error: {0}")]
    Binary(#[from] BinaryError),
}

pub struct Client {
    weak_self: Weak<Client>,
    pub(crate) config: ClientConfig,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) creds: Mutex<Creds>,
    pub event_bus: EventBus,

    state: StdMutex<SessionState>,
    frame_socket: Mutex<Option<Arc<FrameSocket>>>,
    pub(crate) noise_socket: Mutex<Option<Arc<NoiseSocket>>>,

    pub(crate) response_waiters: Mutex<HashMap<String, oneshot::Sender<Node>>>,
    pub(crate) subscriptions: StdMutex<Vec<Subscription>>,
    pub(crate) subscription_counter: AtomicUsize,
    pub(crate) tag_prefix: String,
    pub(crate) tag_counter: AtomicU64,

    pub(crate) last_frame_received: StdMutex<Instant>,
    pub(crate) shutdown: Notify,
    ended: AtomicBool,
    pub(crate) pair_completed: AtomicBool,
    pub(crate) qr_stop: StdMutex<Option<watch::Sender<()>>>,
}

impl Client {
    /// Creates a client over the given store. Credentials are loaded from the
    /// backend, or freshly generated (and saved) when none exist yet.
    pub async fn new(
        config: ClientConfig,
        backend: Arc<dyn Backend>,
    ) -> Result<Arc<Self>, anyhow::Error> {
        let creds = match backend.load_creds().await? {
            Some(creds) => creds,
            None => {
                let creds = Creds::generate();
                backend.save_creds(&creds).await?;
                info!(target: "Client", "generated fresh credentials, pairing required");
                creds
            }
        };

        let mut prefix_bytes = [0u8; 3];
        rand::thread_rng().fill_bytes(&mut prefix_bytes);
        let tag_prefix = format!("{}.", BASE64.encode(prefix_bytes));

        let client = Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            config,
            backend,
            creds: Mutex::new(creds),
            event_bus: EventBus::new(),
            state: StdMutex::new(SessionState::Idle),
            frame_socket: Mutex::new(None),
            noise_socket: Mutex::new(None),
            response_waiters: Mutex::new(HashMap::new()),
            subscriptions: StdMutex::new(Vec::new()),
            subscription_counter: AtomicUsize::new(0),
            tag_prefix,
            tag_counter: AtomicU64::new(1),
            last_frame_received: StdMutex::new(Instant::now()),
            shutdown: Notify::new(),
            ended: AtomicBool::new(false),
            pair_completed: AtomicBool::new(false),
            qr_stop: StdMutex::new(None),
        });

        if client.config.print_qr_in_terminal {
            client.event_bus.on(
                EventKind::ConnectionUpdate,
                Arc::new(|event| {
                    if let Event::ConnectionUpdate(update) = event {
                        if let Some(qr) = &update.qr {
                            info!(target: "Client", "scan to pair: {qr}");
                        }
                    }
                }),
            );
        }

        Ok(client)
    }

    /// The client is always owned by an `Arc`; this recovers it for task
    /// spawning from `&self` methods.
    pub(crate) fn arc(&self) -> Arc<Client> {
        self.weak_self
            .upgrade()
            .expect("client methods run behind the owning Arc")
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock().unwrap();
        debug!(target: "Client", "state {:?} -> {next:?}", *state);
        *state = next;
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state(),
            SessionState::LoggingIn | SessionState::Registering | SessionState::Active
        )
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Opens the socket, runs the Noise handshake, and starts the read and
    /// keep-alive loops. Resolution does not imply login; watch
    /// `connection.update` for the rest of the lifecycle.
    pub async fn connect(&self) -> Result<(), anyhow::Error> {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Idle {
                return Err(ClientError::AlreadyConnected.into());
            }
            *state = SessionState::Connecting;
        }
        self.emit_connection_update(ConnectionUpdate {
            connection: Some(ConnectionState::Connecting),
            ..Default::default()
        });

        let (frame_socket, mut frames_rx) = FrameSocket::new();
        let frame_socket = Arc::new(frame_socket);
        frame_socket
            .connect(&self.config.websocket_url, self.config.connect_timeout)
            .await?;

        self.set_state(SessionState::Handshaking);
        let (write_key, read_key) = {
            let creds = self.creds.lock().await;
            handshake::do_handshake(&creds, &self.config, &frame_socket, &mut frames_rx).await?
        };
        let noise_socket = Arc::new(NoiseSocket::new(frame_socket.clone(), write_key, read_key));

        *self.frame_socket.lock().await = Some(frame_socket);
        *self.noise_socket.lock().await = Some(noise_socket);
        *self.last_frame_received.lock().unwrap() = Instant::now();

        let logged_in = self.creds.lock().await.me.is_some();
        self.set_state(if logged_in {
            SessionState::LoggingIn
        } else {
            SessionState::Registering
        });

        tokio::spawn(self.arc().read_loop(frames_rx));
        tokio::spawn(self.arc().keepalive_loop());
        Ok(())
    }

    async fn read_loop(self: Arc<Self>, mut frames_rx: mpsc::Receiver<Bytes>) {
        info!(target: "Client", "read loop started");
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => {
                    debug!(target: "Client", "shutdown signaled, read loop exiting");
                    return;
                }
                frame = frames_rx.recv() => match frame {
                    Some(frame) => self.process_encrypted_frame(&frame).await,
                    None => {
                        info!(target: "Client", "socket disconnected");
                        self.end(Some(WaError::ConnectionClosed)).await;
                        return;
                    }
                }
            }
        }
    }

    async fn process_encrypted_frame(&self, frame: &Bytes) {
        let noise_socket = match self.noise_socket.lock().await.clone() {
            Some(socket) => socket,
            None => {
                error!(target: "Client/Recv", "frame received without a noise socket");
                return;
            }
        };

        let plaintext = match noise_socket.decrypt_frame(frame) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                error!(target: "Client/Recv", "failed to decrypt frame: {e}");
                self.end(Some(WaError::BadSession)).await;
                return;
            }
        };
        *self.last_frame_received.lock().unwrap() = Instant::now();

        let node = match binary::util::unpack(&plaintext)
            .and_then(|payload| binary::unmarshal(&payload))
        {
            Ok(node) => node,
            Err(e) => {
                error!(target: "Client/Recv", "failed to decode stanza: {e}");
                self.end(Some(WaError::BadSession)).await;
                return;
            }
        };

        self.process_node(node).await;
    }

    async fn process_node(&self, node: Node) {
        debug!(target: "Client/Recv", "{node}");

        // Tag correlation first, then lifecycle handling, then pattern
        // subscriptions; the unhandled sink sees whatever nothing claimed.
        let delivered = self.deliver_response(&node).await;

        let builtin = match node.tag.as_str() {
            "success" => {
                self.handle_success(&node).await;
                true
            }
            "failure" => {
                self.handle_failure(&node).await;
                true
            }
            "stream:error" => {
                self.handle_stream_error(&node).await;
                true
            }
            "xmlstreamend" => {
                self.end(Some(WaError::ConnectionClosed)).await;
                true
            }
            "ib" => self.handle_ib(&node).await,
            "iq" => self.handle_iq(&node).await,
            _ => false,
        };

        let subscribed = self.dispatch_subscriptions(&node);

        if !delivered && !builtin && !subscribed {
            debug!(target: "Client/Recv", "unhandled stanza: {node}");
        }
    }

    async fn handle_success(&self, _node: &Node) {
        if !matches!(
            self.state(),
            SessionState::LoggingIn | SessionState::Registering
        ) {
            warn!(target: "Client", "<success> in state {:?}, ignoring", self.state());
            return;
        }
        info!(target: "Client", "authenticated with the server");
        self.set_state(SessionState::Active);

        // Post-login work awaits responses, which this loop must keep routing.
        let client = self.arc();
        tokio::spawn(async move {
            client.top_up_prekeys().await;

            let passive = NodeBuilder::new("iq")
                .attr("id", client.generate_message_tag())
                .attr("xmlns", "passive")
                .attr("type", "set")
                .jid_attr("to", crate::binary::jid::Jid::server_jid())
                .children([NodeBuilder::new("active").build()])
                .build();
            if let Err(e) = client.query(passive).await {
                warn!(target: "Client", "passive/active request failed: {e}");
            }

            client.emit_connection_update(ConnectionUpdate {
                connection: Some(ConnectionState::Open),
                ..Default::default()
            });
        });
    }

    async fn handle_failure(&self, node: &Node) {
        let mut attrs = node.attrs();
        let reason = attrs.optional_u64("reason").unwrap_or(0);
        let error = match reason {
            401 | 403 => WaError::LoggedOut,
            411 => WaError::MultideviceMismatch,
            500 => WaError::BadSession,
            _ => WaError::ConnectionClosed,
        };
        warn!(target: "Client", "connect failure (reason {reason}): {error}");
        self.end(Some(error)).await;
    }

    async fn handle_stream_error(&self, node: &Node) {
        let code = node.attrs().optional_string("code").unwrap_or_default();
        let conflict_type = node
            .get_optional_child("conflict")
            .and_then(|n| n.attrs().optional_string("type"))
            .unwrap_or_default();

        let error = if self.pair_completed.load(Ordering::Relaxed) {
            // The reconnect signal after pairing; anything else at that point
            // means the stream state is beyond recovery.
            if code == "515" {
                WaError::RestartRequired
            } else {
                WaError::BadSession
            }
        } else {
            match (code.as_str(), conflict_type.as_str()) {
                ("515", _) => WaError::RestartRequired,
                ("401", _) => WaError::LoggedOut,
                (_, "replaced") => WaError::ConnectionReplaced,
                _ => WaError::ConnectionClosed,
            }
        };
        warn!(target: "Client", "stream error (code '{code}'): {error}");
        self.end(Some(error)).await;
    }

    async fn handle_ib(&self, node: &Node) -> bool {
        let Some(offline) = node.get_optional_child("offline") else {
            return false;
        };
        let count = offline.attrs().optional_u64("count").unwrap_or(0);
        info!(target: "Client", "offline preview: {count} pending notifications");
        self.emit_connection_update(ConnectionUpdate {
            received_pending_notifications: Some(true),
            ..Default::default()
        });
        true
    }

    async fn handle_iq(&self, node: &Node) -> bool {
        // Unsolicited server ping; answered with an empty result.
        if node.attrs().optional_string("type").as_deref() == Some("get")
            && node.get_optional_child("ping").is_some()
        {
            let mut parser = node.attrs();
            let from = parser.jid("from");
            let id = parser.string("id");
            let pong = NodeBuilder::new("iq")
                .jid_attr("to", from)
                .attr("id", id)
                .attr("type", "result")
                .build();
            if let Err(e) = self.send_node(pong).await {
                warn!(target: "Client", "failed to answer server ping: {e}");
            }
            return true;
        }

        pair::handle_iq(&self.arc(), node).await
    }

    pub async fn send_node(&self, node: Node) -> Result<(), ClientError> {
        let noise_socket = self
            .noise_socket
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;

        debug!(target: "Client/Send", "{node}");
        let payload = binary::marshal(&node)?;
        noise_socket.send_frame(&payload).await?;
        Ok(())
    }

    /// Applies a partial credential change, persists it, and announces it.
    /// Persistence and side-effects run here rather than in a bus listener,
    /// so emission order stays deterministic.
    pub(crate) async fn persist_creds_update(&self, update: CredsUpdate) {
        {
            let mut creds = self.creds.lock().await;
            creds.apply_update(&update);
            if let Err(e) = self.backend.save_creds(&creds).await {
                warn!(target: "Client", "failed to persist credentials: {e}");
            }
        }
        self.event_bus.emit(&Event::CredsUpdate(update));
    }

    pub(crate) fn emit_connection_update(&self, update: ConnectionUpdate) {
        self.event_bus.emit(&Event::ConnectionUpdate(update));
    }

    pub async fn creds_snapshot(&self) -> Creds {
        self.creds.lock().await.clone()
    }

    /// Sends the companion-device removal request, then terminates the
    /// session with `LoggedOut`.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let me = self
            .creds
            .lock()
            .await
            .me
            .clone()
            .ok_or(ClientError::NotLoggedIn)?;

        let removal = NodeBuilder::new("iq")
            .attr("id", self.generate_message_tag())
            .attr("xmlns", "md")
            .attr("type", "set")
            .jid_attr("to", crate::binary::jid::Jid::server_jid())
            .children([NodeBuilder::new("remove-companion-device")
                .jid_attr("jid", me.jid)
                .attr("reason", "user_initiated")
                .build()])
            .build();
        self.send_node(removal).await?;
        self.end(Some(WaError::LoggedOut)).await;
        Ok(())
    }

    /// The single termination path. Cancels timers, fails every pending
    /// request exactly once, closes the socket, emits the terminal
    /// `connection.update`, and clears its listeners.
    pub async fn end(&self, error: Option<WaError>) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(SessionState::Closing);
        self.shutdown.notify_waiters();

        if let Some(stop) = self.qr_stop.lock().unwrap().take() {
            let _ = stop.send(());
        }

        // Dropping the senders fails every in-flight query with
        // `ConnectionClosed`.
        self.response_waiters.lock().await.clear();

        if let Some(noise_socket) = self.noise_socket.lock().await.take() {
            noise_socket.close().await;
        }
        if let Some(frame_socket) = self.frame_socket.lock().await.take() {
            frame_socket.close().await;
        }

        self.set_state(SessionState::Closed);
        match &error {
            Some(e) => info!(target: "Client", "session ended: {e} (status {})", e.status_code()),
            None => info!(target: "Client", "session ended"),
        }

        self.emit_connection_update(ConnectionUpdate {
            connection: Some(ConnectionState::Close),
            last_disconnect: Some(LastDisconnect {
                error,
                at: chrono::Utc::now(),
            }),
            ..Default::default()
        });
        self.event_bus.clear(EventKind::ConnectionUpdate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn client_under_test() -> Arc<Client> {
        Client::new(ClientConfig::default(), Arc::new(MemoryStore::new()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_tag_counter_starts_at_one() {
        let client = client_under_test().await;
        let prefix = client.tag_prefix.clone();
        assert_eq!(client.generate_message_tag(), format!("{prefix}1"));
        assert_eq!(client.generate_message_tag(), format!("{prefix}2"));
        assert_eq!(client.generate_message_tag(), format!("{prefix}3"));
    }

    #[tokio::test]
    async fn test_tags_are_unique() {
        let client = client_under_test().await;
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            assert!(seen.insert(client.generate_message_tag()));
        }
    }

    #[tokio::test]
    async fn test_fresh_client_state() {
        let client = client_under_test().await;
        assert_eq!(client.state(), SessionState::Idle);
        assert!(!client.is_connected());
        assert!(!client.is_active());
    }

    #[tokio::test]
    async fn test_end_fails_pending_requests_and_clears_table() {
        let client = client_under_test().await;
        let (tx, rx) = oneshot::channel();
        client
            .response_waiters
            .lock()
            .await
            .insert("tag.1".to_string(), tx);

        client.end(Some(WaError::ConnectionClosed)).await;

        assert!(client.response_waiters.lock().await.is_empty());
        assert!(rx.await.is_err());
        assert_eq!(client.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_end_emits_close_then_clears_watchers() {
        let client = client_under_test().await;
        let seen = Arc::new(StdMutex::new(Vec::new()));

        let seen_clone = seen.clone();
        client.event_bus.on(
            EventKind::ConnectionUpdate,
            Arc::new(move |event| {
                if let Event::ConnectionUpdate(update) = event {
                    seen_clone.lock().unwrap().push(update.clone());
                }
            }),
        );

        client.end(Some(WaError::ConnectionLost)).await;
        // A second end is a no-op.
        client.end(Some(WaError::ConnectionClosed)).await;

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].connection, Some(ConnectionState::Close));
        let disconnect = events[0].last_disconnect.as_ref().unwrap();
        assert_eq!(disconnect.error, Some(WaError::ConnectionLost));
    }

    #[tokio::test]
    async fn test_logout_requires_pairing() {
        let client = client_under_test().await;
        assert!(matches!(
            client.logout().await,
            Err(ClientError::NotLoggedIn)
        ));
    }
}
