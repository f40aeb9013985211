use crate::client::Client;
use crate::error::WaError;
use crate::types::events::ConnectionUpdate;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// The server grants the first pairing ref a longer life than the rest.
const FIRST_REF_TTL: Duration = Duration::from_secs(60);
const NEXT_REF_TTL: Duration = Duration::from_secs(20);

/// Emits one `connection.update{qr}` per pairing code, honoring each ref's
/// lifetime. Running out of refs before a scan terminates the session with
/// `Timeout`; a successful pairing (or session end) stops the emitter.
pub(crate) fn spawn_qr_emitter(client: Arc<Client>, codes: Vec<String>) {
    let (stop_tx, mut stop_rx) = watch::channel(());
    *client.qr_stop.lock().unwrap() = Some(stop_tx);

    tokio::spawn(async move {
        let mut first = true;
        for code in codes {
            let ttl = if first { FIRST_REF_TTL } else { NEXT_REF_TTL };
            first = false;

            debug!(target: "Client/Pair", "emitting QR code, ttl {}s", ttl.as_secs());
            client.emit_connection_update(ConnectionUpdate {
                qr: Some(code),
                ..Default::default()
            });

            tokio::select! {
                _ = tokio::time::sleep(ttl) => {}
                _ = stop_rx.changed() => {
                    debug!(target: "Client/Pair", "QR emitter stopped");
                    return;
                }
            }
        }

        debug!(target: "Client/Pair", "pairing refs exhausted");
        client.end(Some(WaError::Timeout)).await;
    });
}
