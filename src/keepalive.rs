use crate::binary::jid::Jid;
use crate::binary::node::NodeContent;
use crate::binary::NodeBuilder;
use crate::client::Client;
use crate::error::WaError;
use crate::request::InfoQuery;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// Grace added to the ping cadence before a silent connection is declared
/// lost.
const STALENESS_GRACE: Duration = Duration::from_millis(5000);

fn is_stale(since_last_frame: Duration, interval: Duration) -> bool {
    since_last_frame > interval + STALENESS_GRACE
}

impl Client {
    /// Periodic ping with staleness-based disconnect. The receive timestamp
    /// is refreshed by the read loop on every decrypted frame, so a healthy
    /// connection never trips the check even when pongs are slow.
    pub(crate) async fn keepalive_loop(self: Arc<Self>) {
        let interval = self.config.keep_alive_interval;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let since_last_frame = self.last_frame_received.lock().unwrap().elapsed();
                    if is_stale(since_last_frame, interval) {
                        warn!(target: "Client/Keepalive", "no frames within the staleness window, terminating");
                        self.end(Some(WaError::ConnectionLost)).await;
                        return;
                    }
                    if !self.is_connected() {
                        debug!(target: "Client/Keepalive", "not connected, exiting keepalive loop");
                        return;
                    }

                    // An ordinary request; the response is routed by the read
                    // loop like any other stanza.
                    let client = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = client.send_keepalive().await {
                            warn!(target: "Client/Keepalive", "ping failed: {e}");
                        }
                    });
                }
                _ = self.shutdown.notified() => {
                    debug!(target: "Client/Keepalive", "shutdown signaled, exiting keepalive loop");
                    return;
                }
            }
        }
    }

    async fn send_keepalive(&self) -> Result<(), WaError> {
        debug!(target: "Client/Keepalive", "sending ping");
        let query = InfoQuery::get(
            "w:p",
            Jid::server_jid(),
            Some(NodeContent::Nodes(vec![NodeBuilder::new("ping").build()])),
        )
        .with_timeout(self.config.keep_alive_interval);
        self.send_iq(query).await?;
        debug!(target: "Client/Keepalive", "received pong");
        Ok(())
    }
}
