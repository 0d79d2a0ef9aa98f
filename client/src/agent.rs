//! Downstream dialogue-agent sink (SPEC_FULL.md "Supplemented features").
//! `spec.md` scopes the agent's own behavior out as a Non-goal but treats it
//! as a boundary collaborator exactly like the TTS sink (§6.3 lists
//! `AGENT_URL`/`AGENT_COOLDOWN_MS`; §4.2's cooldown rule names "the agent
//! response"). Grounded line-for-line on `AgentClient` in the Python
//! original's `client/main.py`.

use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{info, warn};

pub struct AgentReply {
    pub text: String,
    pub ssml: Option<String>,
}

#[derive(Deserialize)]
struct AgentResponseWire {
    #[serde(default)]
    text: String,
    #[serde(default)]
    ssml: Option<String>,
}

/// One instance per client process; `session_id` is stable across
/// reconnects and utterances so the agent can correlate a conversation.
pub struct AgentClient {
    url: String,
    session_id: String,
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl AgentClient {
    pub fn new(url: String) -> Self {
        Self {
            url,
            session_id: uuid::Uuid::new_v4().to_string(),
            stream: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn ensure_connected(&mut self) -> bool {
        if self.stream.is_some() {
            return true;
        }
        match connect_async(&self.url).await {
            Ok((stream, _)) => {
                info!(url = %self.url, "[agent] connected");
                self.stream = Some(stream);
                true
            }
            Err(e) => {
                warn!(%e, "[agent] not available");
                false
            }
        }
    }

    /// Send a committed transcript and await the agent's reply, with the
    /// spec's fixed 60s timeout. `None` on any transport failure or timeout
    /// (spec §7: agent is a boundary collaborator, failures here are not
    /// fatal to the recognition session).
    pub async fn send_transcription(
        &mut self,
        text: &str,
        traceparent: Option<&str>,
    ) -> Option<AgentReply> {
        if !self.ensure_connected().await {
            return None;
        }
        let stream = self.stream.as_mut()?;

        let mut payload = json!({
            "type": "transcription",
            "text": text,
            "session_id": self.session_id,
        });
        if let Some(tp) = traceparent {
            payload["traceparent"] = json!(tp);
        }

        info!("[you -> agent] {text}");
        if stream.send(Message::Text(payload.to_string())).await.is_err() {
            self.stream = None;
            return None;
        }

        let reply = tokio::time::timeout(Duration::from_secs(60), stream.next()).await;
        match reply {
            Ok(Some(Ok(Message::Text(raw)))) => match serde_json::from_str::<AgentResponseWire>(&raw) {
                Ok(wire) => Some(AgentReply { text: wire.text, ssml: wire.ssml }),
                Err(e) => {
                    warn!(%e, "[agent] malformed reply");
                    None
                }
            },
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                self.stream = None;
                None
            }
            Ok(Some(Err(e))) => {
                warn!(%e, "[agent] connection lost");
                self.stream = None;
                None
            }
            Ok(Some(Ok(_))) => None,
            Err(_) => {
                warn!("[agent] request timed out (60s)");
                None
            }
        }
    }

    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_stable_across_calls() {
        let client = AgentClient::new("ws://example.invalid".into());
        assert_eq!(client.session_id(), client.session_id());
    }
}
