//! Client Session (spec §4.2): owns the Speech Gate, drives batch or
//! streaming segmentation, transports utterance audio, and dispatches
//! replies to the optional agent/TTS sinks with the cooldown window spec
//! §4.2 requires. Grounded on the Python original's `BatchClient`/
//! `StreamingClient` (`client/main.py`), split into one function per mode
//! the same way the original splits into two classes.

use crate::agent::AgentClient;
use crate::cooldown::CooldownGate;
use crate::latency::LatencyStats;
use crate::transport::Transport;
use crate::tts::TtsClient;
use shared_protocol::{ClientMessage, ServerMessage, Strategy, encode_audio};
use speech_gate::{GateEvent, SpeechGate};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, tungstenite::Message};
use tracing::{info, warn};

/// Small fixed wind-down after TTS playback completes, matching the
/// Python original's `cooldown_s = 0.5` in `client/main.py`.
const TTS_TAIL_COOLDOWN: Duration = Duration::from_millis(500);

pub enum ClientMode {
    Batch,
    Streaming,
}

pub struct SessionConfig {
    pub server_url: String,
    pub mode: ClientMode,
    pub strategy: Strategy,
    pub sample_rate: u32,
    pub reconnect_interval: Duration,
    pub agent_cooldown: Duration,
}

pub struct Sinks {
    pub agent: Option<AgentClient>,
    pub tts: Option<TtsClient>,
}

fn strategy_path(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::Prompt => "prompt",
        Strategy::Context => "context",
        Strategy::Hybrid => "hybrid",
    }
}

/// Forward an accepted transcript to the agent sink (if any), play its reply
/// through the TTS sink (if any), and start the feedback-suppression
/// cooldown (spec §4.2). A no-op when no agent is configured.
async fn dispatch_reply(
    text: &str,
    sinks: &mut Sinks,
    cooldown: &mut CooldownGate,
    agent_cooldown: Duration,
) {
    let Some(agent) = sinks.agent.as_mut() else {
        return;
    };
    let Some(reply) = agent.send_transcription(text, None).await else {
        return;
    };
    info!("[agent] {}", reply.text);

    if let Some(tts) = sinks.tts.as_ref() {
        // Capture begins queuing again only after playback settles, so the
        // tentative deadline just needs to outlive the synchronous speak().
        cooldown.start(Instant::now(), Duration::from_secs(60));
        let session_id = agent.session_id().to_string();
        let played = tts.speak(&reply.text, reply.ssml.as_deref(), None, Some(&session_id)).await;
        cooldown.start(Instant::now(), played + TTS_TAIL_COOLDOWN);
        info!("[listening]");
    } else {
        cooldown.start(Instant::now(), agent_cooldown);
        info!("[mic muted for {:?}]", agent_cooldown);
    }
}

/// Batch mode (spec §4.2): one `transcribe` request, one reply, per
/// utterance.
pub async fn run_batch(
    cfg: SessionConfig,
    mut gate: SpeechGate,
    mut frames: mpsc::Receiver<Vec<f32>>,
    mut sinks: Sinks,
    mut latency: LatencyStats,
) {
    let transport = Transport::new(format!("{}/ws/transcribe", cfg.server_url));
    transport.connect().await;
    let reconnect = transport.spawn_reconnect_loop(cfg.reconnect_interval);
    let mut cooldown = CooldownGate::new();

    while let Some(frame) = frames.recv().await {
        let now = Instant::now();
        if cooldown.active(now) {
            gate.reset();
            continue;
        }

        let GateEvent::Finalized { samples, duration_ms, accepted, .. } = gate.process_frame(&frame) else {
            continue;
        };
        if !accepted {
            continue;
        }
        if !transport.is_connected().await {
            warn!(duration_ms, "[offline] speech detected - server unavailable");
            continue;
        }

        let utterance_start = Instant::now();
        let msg = ClientMessage::Transcribe {
            audio: encode_audio(&samples),
            sample_rate: cfg.sample_rate,
            session_id: sinks.agent.as_ref().map(|a| a.session_id().to_string()),
            traceparent: None,
        };

        let Some(reply) = transport.send_and_recv(&msg).await else {
            continue;
        };

        match reply {
            ServerMessage::Result { text, .. } | ServerMessage::Final { text, .. } => {
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                let e2e_ms = utterance_start.elapsed().as_secs_f64() * 1000.0;
                latency.record(e2e_ms, None);
                info!("[transcriber] [{e2e_ms:.0}ms] {text}");
                dispatch_reply(text, &mut sinks, &mut cooldown, cfg.agent_cooldown).await;
            }
            ServerMessage::Noise { sample } => {
                tracing::debug!("[noise] {sample}");
            }
            ServerMessage::Partial { .. } => {}
        }
    }

    reconnect.abort();
    if let Some(agent) = sinks.agent.as_mut() {
        agent.close().await;
    }
    info!("--- latency summary ---");
    info!("{}", latency.summary());
}

/// Streaming mode (spec §4.2, §4.3): `audio_frame`/`vad_end` are fired and
/// forgotten — the server paces `partial` replies on its own timer — so
/// sends and inbound replies are genuinely concurrent per connection,
/// unlike the batch path's strict request/response.
pub async fn run_streaming(
    cfg: SessionConfig,
    mut gate: SpeechGate,
    mut frames: mpsc::Receiver<Vec<f32>>,
    mut sinks: Sinks,
    mut latency: LatencyStats,
) {
    let url = format!("{}/ws/transcribe/{}", cfg.server_url, strategy_path(cfg.strategy));
    let ws_config = WebSocketConfig {
        max_message_size: Some(shared_protocol::MAX_WS_MESSAGE_BYTES),
        ..Default::default()
    };

    let mut ws = None;
    let mut cooldown = CooldownGate::new();
    let mut collected: Vec<String> = Vec::new();
    let mut utterance_start: Option<Instant> = None;
    let mut first_result_at: Option<Instant> = None;

    'outer: loop {
        if ws.is_none() {
            match connect_async_with_config(&url, Some(ws_config), false).await {
                Ok((stream, _)) => {
                    info!(%url, "[connected] server connected");
                    ws = Some(stream);
                }
                Err(e) => {
                    warn!(%e, "[offline] server not available");
                }
            }
        }

        let Some(stream) = ws.as_mut() else {
            tokio::select! {
                _ = tokio::time::sleep(cfg.reconnect_interval) => continue 'outer,
                frame = frames.recv() => {
                    let Some(frame) = frame else { break 'outer };
                    // Capture and speech detection keep running while
                    // disconnected so the user's activity stays observable
                    // (spec §4.2); the resulting boundary is simply dropped.
                    let _ = gate.process_frame(&frame);
                }
            }
            continue 'outer;
        };

        tokio::select! {
            frame = frames.recv() => {
                let Some(frame) = frame else { break 'outer };
                let now = Instant::now();
                if cooldown.active(now) {
                    gate.reset();
                    continue 'outer;
                }
                match gate.process_frame(&frame) {
                    GateEvent::Continue => {}
                    GateEvent::PartialBoundary { samples } => {
                        utterance_start.get_or_insert(now);
                        let msg = ClientMessage::AudioFrame { audio: encode_audio(&samples), sample_rate: cfg.sample_rate };
                        if send_json(stream, &msg).await.is_err() {
                            ws = None;
                        }
                    }
                    GateEvent::Finalized { samples, accepted, .. } => {
                        utterance_start.get_or_insert(now);
                        if !accepted {
                            utterance_start = None;
                            collected.clear();
                            continue 'outer;
                        }
                        if !samples.is_empty() {
                            let msg = ClientMessage::AudioFrame { audio: encode_audio(&samples), sample_rate: cfg.sample_rate };
                            if send_json(stream, &msg).await.is_err() {
                                ws = None;
                                continue 'outer;
                            }
                        }
                        if send_json(stream, &ClientMessage::VadEnd).await.is_err() {
                            ws = None;
                        }
                    }
                }
            }
            msg = futures_util::StreamExt::next(stream) => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(ServerMessage::Partial { text, .. }) => {
                                if !text.is_empty() {
                                    first_result_at.get_or_insert(Instant::now());
                                    info!("[transcriber] [chunk {}] {text}", collected.len() + 1);
                                    collected.push(text);
                                }
                            }
                            Ok(ServerMessage::Final { text, .. }) => {
                                if !text.is_empty() {
                                    collected.push(text);
                                }
                                if let Some(start) = utterance_start.take()
                                    && !collected.is_empty()
                                {
                                    let summary = collected.join(" ");
                                    let e2e_ms = start.elapsed().as_secs_f64() * 1000.0;
                                    let first_ms = first_result_at.map(|t| t.duration_since(start).as_secs_f64() * 1000.0);
                                    latency.record(e2e_ms, first_ms);
                                    info!("[transcriber] [complete {e2e_ms:.0}ms] {summary}");
                                    dispatch_reply(&summary, &mut sinks, &mut cooldown, cfg.agent_cooldown).await;
                                }
                                collected.clear();
                                first_result_at = None;
                            }
                            Ok(_) => {}
                            Err(e) => warn!(%e, "malformed server message"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => ws = None,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%e, "[disconnected] server connection lost");
                        ws = None;
                    }
                }
            }
        }
    }

    if let Some(agent) = sinks.agent.as_mut() {
        agent.close().await;
    }
    info!("--- latency summary ---");
    info!("{}", latency.summary());
}

async fn send_json<S>(stream: &mut S, msg: &ClientMessage) -> Result<(), ()>
where
    S: futures_util::Sink<Message> + Unpin,
{
    let payload = serde_json::to_string(msg).expect("ClientMessage always serializes");
    futures_util::SinkExt::send(stream, Message::Text(payload)).await.map_err(|_| ())
}
