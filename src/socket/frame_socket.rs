use crate::socket::consts::{
    FRAME_LENGTH_SIZE, FRAME_MAX_SIZE, WA_CONN_HEADER, WEBSOCKET_EXTENSIONS, WEBSOCKET_ORIGIN,
};
use crate::socket::error::{Result, SocketError};
use bytes::{Buf, Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, ORIGIN, SEC_WEBSOCKET_EXTENSIONS};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<RawWs, Message>;
type WsStream = SplitStream<RawWs>;

/// Length-prefixed frame transport over a WebSocket. Outbound frames carry a
/// 3-byte big-endian length; the connection header is prepended to the very
/// first frame only. Inbound WebSocket messages are reassembled into frames,
/// several of which may arrive in one message.
///
/// The read pump owns the only frame sender, so the channel closing is the
/// disconnect signal for the consumer.
pub struct FrameSocket {
    ws_sink: Arc<Mutex<Option<WsSink>>>,
    frames_tx: Mutex<Option<Sender<Bytes>>>,
    is_connected: Arc<Mutex<bool>>,
    header: Arc<Mutex<Option<Vec<u8>>>>,
}

impl FrameSocket {
    pub fn new() -> (Self, Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(100);
        let socket = Self {
            ws_sink: Arc::new(Mutex::new(None)),
            frames_tx: Mutex::new(Some(tx)),
            is_connected: Arc::new(Mutex::new(false)),
            header: Arc::new(Mutex::new(Some(WA_CONN_HEADER.to_vec()))),
        };
        (socket, rx)
    }

    pub async fn is_connected(&self) -> bool {
        *self.is_connected.lock().await
    }

    pub async fn connect(&self, url: &str, connect_timeout: Duration) -> Result<()> {
        if self.is_connected().await {
            return Err(SocketError::SocketAlreadyOpen);
        }
        let frames_tx = self
            .frames_tx
            .lock()
            .await
            .take()
            .ok_or(SocketError::SocketClosed)?;

        info!(target: "Socket", "Dialing {url}");
        let mut request = url
            .into_client_request()
            .map_err(|e| SocketError::WebSocket(e.to_string()))?;
        request
            .headers_mut()
            .insert(ORIGIN, HeaderValue::from_static(WEBSOCKET_ORIGIN));
        request.headers_mut().insert(
            SEC_WEBSOCKET_EXTENSIONS,
            HeaderValue::from_static(WEBSOCKET_EXTENSIONS),
        );

        let (ws, _response) = tokio::time::timeout(connect_timeout, connect_async(request))
            .await
            .map_err(|_| SocketError::ConnectTimeout)??;

        let (sink, stream) = ws.split();
        *self.ws_sink.lock().await = Some(sink);
        *self.is_connected.lock().await = true;

        tokio::spawn(Self::read_pump(stream, frames_tx, self.is_connected.clone()));

        Ok(())
    }

    pub async fn send_frame(&self, data: &[u8]) -> Result<()> {
        let data_len = data.len();
        if data_len > FRAME_MAX_SIZE {
            return Err(SocketError::FrameTooLarge {
                max: FRAME_MAX_SIZE,
                got: data_len,
            });
        }

        let mut sink_guard = self.ws_sink.lock().await;
        let sink = sink_guard.as_mut().ok_or(SocketError::SocketClosed)?;

        let header = self.header.lock().await.take().unwrap_or_default();
        let mut frame = Vec::with_capacity(header.len() + FRAME_LENGTH_SIZE + data_len);
        frame.extend_from_slice(&header);
        frame.extend_from_slice(&u32::to_be_bytes(data_len as u32)[1..]);
        frame.extend_from_slice(data);

        debug!(
            target: "Socket",
            "--> sending frame: payload {data_len} bytes, total {} bytes",
            frame.len()
        );
        sink.send(Message::Binary(frame)).await?;
        Ok(())
    }

    async fn read_pump(
        mut stream: WsStream,
        frames_tx: Sender<Bytes>,
        is_connected: Arc<Mutex<bool>>,
    ) {
        let mut buffer = BytesMut::new();

        'outer: loop {
            match stream.next().await {
                Some(Ok(msg)) => {
                    if msg.is_binary() {
                        let data = msg.into_data();
                        trace!(target: "Socket", "<-- websocket message: {} bytes", data.len());
                        buffer.extend_from_slice(&data);

                        while buffer.len() >= FRAME_LENGTH_SIZE {
                            let frame_len = ((buffer[0] as usize) << 16)
                                | ((buffer[1] as usize) << 8)
                                | (buffer[2] as usize);

                            if buffer.len() < FRAME_LENGTH_SIZE + frame_len {
                                break;
                            }
                            buffer.advance(FRAME_LENGTH_SIZE);
                            let frame = buffer.split_to(frame_len).freeze();
                            trace!(target: "Socket", "<-- assembled frame: {} bytes", frame.len());
                            if frames_tx.send(frame).await.is_err() {
                                warn!(target: "Socket", "frame receiver dropped, closing read pump");
                                break 'outer;
                            }
                        }
                    } else if msg.is_close() {
                        trace!(target: "Socket", "received close frame");
                        break;
                    }
                }
                Some(Err(e)) => {
                    error!(target: "Socket", "error reading from websocket: {e}");
                    break;
                }
                None => {
                    trace!(target: "Socket", "websocket stream ended");
                    break;
                }
            }
        }

        *is_connected.lock().await = false;
        // frames_tx drops here; the closed channel is the disconnect signal.
    }

    pub async fn close(&self) {
        let mut is_connected = self.is_connected.lock().await;
        if *is_connected {
            *is_connected = false;
            if let Some(mut sink) = self.ws_sink.lock().await.take() {
                let _ = sink.send(Message::Close(None)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_size_boundary() {
        let (socket, _rx) = FrameSocket::new();

        // One byte over the 24-bit length cap is rejected outright.
        let oversized = vec![0u8; FRAME_MAX_SIZE + 1];
        assert!(matches!(
            socket.send_frame(&oversized).await,
            Err(SocketError::FrameTooLarge { .. })
        ));

        // A maximal frame passes the size check; without an open socket the
        // failure is the closed sink, not the length.
        let maximal = vec![0u8; FRAME_MAX_SIZE];
        assert!(matches!(
            socket.send_frame(&maximal).await,
            Err(SocketError::SocketClosed)
        ));
    }
}
