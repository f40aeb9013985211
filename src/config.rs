use crate::socket::consts::DEFAULT_WEBSOCKET_URL;
use crate::version::{ClientVersion, DEFAULT_CLIENT_VERSION};
use std::time::Duration;

/// Identity shown on the phone's linked-devices page.
#[derive(Debug, Clone)]
pub struct Browser {
    pub vendor: String,
    pub name: String,
    pub version: String,
}

impl Browser {
    pub fn new(
        vendor: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            vendor: vendor.into(),
            name: name.into(),
            version: version.into(),
        }
    }

    pub fn ubuntu_chrome() -> Self {
        Self::new("Ubuntu", "Chrome", "22.04.4")
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint of the chat gateway.
    pub websocket_url: String,
    /// Deadline for establishing the WebSocket connection.
    pub connect_timeout: Duration,
    /// Ping cadence; staleness beyond this plus a 5 s grace terminates.
    pub keep_alive_interval: Duration,
    /// Per-request default deadline; `None` disables request timeouts.
    pub default_query_timeout: Option<Duration>,
    pub version: ClientVersion,
    pub browser: Browser,
    /// Logs QR payloads as they are emitted, for terminal-driven pairing.
    pub print_qr_in_terminal: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            websocket_url: DEFAULT_WEBSOCKET_URL.to_string(),
            connect_timeout: Duration::from_secs(20),
            keep_alive_interval: Duration::from_secs(30),
            default_query_timeout: Some(Duration::from_secs(75)),
            version: DEFAULT_CLIENT_VERSION,
            browser: Browser::ubuntu_chrome(),
            print_qr_in_terminal: false,
        }
    }
}
