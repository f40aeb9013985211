use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("socket is already open")]
    SocketAlreadyOpen,
    #[error("socket is closed")]
    SocketClosed,
    #[error("frame is too large (max: {max}, got: {got})")]
    FrameTooLarge { max: usize, got: usize },
    #[error("websocket error: {0}")]
    WebSocket(String),
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("crypto operation failed: {0}")]
    Crypto(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SocketError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SocketError::WebSocket(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SocketError>;
