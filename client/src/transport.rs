//! Wire Protocol transport to the transcriber (spec §4.3, §4.2
//! "Reconnection"). A connection is shared between the session's send/recv
//! path and a background reconnect task (spec §4.2: "A background activity
//! periodically reconnects whenever the transport is not connected; while
//! disconnected, audio capture and speech detection continue").

use futures_util::{SinkExt, StreamExt};
use shared_protocol::{ClientMessage, MAX_WS_MESSAGE_BYTES, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_with_config, tungstenite::Message};
use tracing::{info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Inner {
    url: String,
    stream: Option<WsStream>,
}

impl Inner {
    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn connect(&mut self) -> bool {
        let config = WebSocketConfig {
            max_message_size: Some(MAX_WS_MESSAGE_BYTES),
            ..Default::default()
        };
        match connect_async_with_config(&self.url, Some(config), false).await {
            Ok((stream, _)) => {
                info!(url = %self.url, "[connected] server connected");
                self.stream = Some(stream);
                true
            }
            Err(e) => {
                self.stream = None;
                warn!(%e, "[offline] server not available");
                false
            }
        }
    }

    async fn send(&mut self, msg: &ClientMessage) -> bool {
        let Some(stream) = self.stream.as_mut() else {
            return false;
        };
        let payload = serde_json::to_string(msg).expect("ClientMessage always serializes");
        if stream.send(Message::Text(payload)).await.is_err() {
            self.stream = None;
            return false;
        }
        true
    }

    async fn recv(&mut self) -> Option<ServerMessage> {
        let stream = self.stream.as_mut()?;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(msg) => return Some(msg),
                    Err(e) => {
                        warn!(%e, "malformed server message");
                        continue;
                    }
                },
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => {
                    self.stream = None;
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(%e, "[disconnected] server connection lost");
                    self.stream = None;
                    return None;
                }
            }
        }
    }
}

/// Shared handle to a reconnecting WebSocket connection to the transcriber.
/// Cloning shares the underlying connection; `spawn_reconnect_loop` owns the
/// background reconnect activity and is cancelled at shutdown via its
/// `JoinHandle`.
#[derive(Clone)]
pub struct Transport(Arc<Mutex<Inner>>);

impl Transport {
    pub fn new(url: String) -> Self {
        Self(Arc::new(Mutex::new(Inner { url, stream: None })))
    }

    pub async fn is_connected(&self) -> bool {
        self.0.lock().await.is_connected()
    }

    pub async fn connect(&self) -> bool {
        self.0.lock().await.connect().await
    }

    /// One request/one reply, per the batch-mode contract (spec §4.3).
    /// `None` if not connected, the send failed, or the connection dropped
    /// before a reply arrived (spec §7: the client simply sees no reply).
    pub async fn send_and_recv(&self, msg: &ClientMessage) -> Option<ServerMessage> {
        let mut inner = self.0.lock().await;
        if !inner.is_connected() {
            return None;
        }
        if !inner.send(msg).await {
            return None;
        }
        inner.recv().await
    }

    /// Background reconnect activity (spec §4.2, §5 "Background activities
    /// are cancellable at shutdown"). Aborting the returned handle stops it.
    pub fn spawn_reconnect_loop(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move {
            loop {
                if !transport.is_connected().await {
                    transport.connect().await;
                }
                tokio::time::sleep(interval).await;
            }
        })
    }
}
