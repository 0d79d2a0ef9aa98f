//! Server host (spec §4.7): accepts WebSocket connections, routes the path
//! to a strategy, warms the recognizer up at startup, and serializes
//! recognizer calls through a bounded worker pool. Rewritten from the
//! teacher's raw `tokio_tungstenite`+`TcpListener` accept loop onto `axum`
//! for natural path-based strategy routing and close-code-1008 rejection.

use axum::{
    Router,
    extract::{
        Path, State,
        ws::{CloseFrame, Message as WsMessage, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use clap::Parser;
use recognizer::RecognitionBackend;
use server_session::{FinalOutcome, RecognitionSession};
use shared_protocol::{ClientMessage, SAMPLE_RATE, ServerMessage, Strategy, decode_audio};
use std::{net::SocketAddr, sync::Arc, time::Instant};
use tokio::sync::Semaphore;
use tracing::{info, warn};

#[derive(Parser, Debug, Clone)]
#[command(name = "transcriber")]
struct Args {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 8765)]
    port: u16,

    #[arg(long, env = "WHISPER_BACKEND", default_value = "whisper-rs")]
    whisper_backend: String,

    #[arg(long, env = "WHISPER_MODEL", default_value = "small")]
    whisper_model: String,

    #[arg(long, env = "PARTIAL_INTERVAL_MS", default_value_t = shared_protocol::PARTIAL_INTERVAL_MS)]
    partial_interval_ms: u32,

    /// Worker pool size serializing recognizer calls (spec §5: "size ≥ 1").
    #[arg(long, env = "RECOGNIZER_WORKERS", default_value_t = 1)]
    recognizer_workers: usize,
}

#[derive(Clone)]
struct AppState {
    backend: Arc<dyn RecognitionBackend>,
    worker: Arc<Semaphore>,
    session_config: server_session::SessionConfig,
}

#[cfg(feature = "whisper")]
fn load_backend(args: &Args) -> anyhow::Result<Arc<dyn RecognitionBackend>> {
    let backend = recognizer::WhisperBackend::load(&args.whisper_model)
        .map_err(|e| anyhow::anyhow!("failed to load {} backend: {e}", args.whisper_backend))?;
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "whisper"))]
fn load_backend(_args: &Args) -> anyhow::Result<Arc<dyn RecognitionBackend>> {
    anyhow::bail!(
        "transcriber was built without the `whisper` feature; rebuild with `--features whisper`"
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let args = Args::parse();

    info!(backend = %args.whisper_backend, model = %args.whisper_model, "loading recognizer backend");
    let backend = load_backend(&args)?;

    info!("warming up model");
    let warmup_audio = vec![0.0f32; SAMPLE_RATE as usize];
    backend
        .transcribe(&warmup_audio, SAMPLE_RATE, None)
        .map_err(|e| anyhow::anyhow!("warmup failed: {e}"))?;
    info!("model ready");

    let state = AppState {
        backend,
        worker: Arc::new(Semaphore::new(args.recognizer_workers.max(1))),
        session_config: server_session::SessionConfig {
            partial_interval_ms: args.partial_interval_ms,
            ..server_session::SessionConfig::default()
        },
    };

    let app = Router::new()
        .route("/ws/transcribe", get(batch_ws))
        .route("/ws/transcribe/{strategy}", get(streaming_ws))
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn batch_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(shared_protocol::MAX_WS_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_batch(socket, state))
}

async fn streaming_ws(
    ws: WebSocketUpgrade,
    Path(strategy): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.max_message_size(shared_protocol::MAX_WS_MESSAGE_BYTES)
        .on_upgrade(move |socket| handle_streaming(socket, strategy, state))
}

/// Offload one `process_final` call to the blocking worker pool, serialized
/// through `state.worker` (spec §5 shared-resource policy).
async fn run_final(
    state: &AppState,
    mut session: RecognitionSession,
) -> (RecognitionSession, Option<FinalOutcome>) {
    let _permit = state.worker.acquire().await.expect("worker semaphore closed");
    let backend = state.backend.clone();
    tokio::task::spawn_blocking(move || {
        let outcome = session.process_final(backend.as_ref());
        (session, outcome)
    })
    .await
    .expect("recognizer worker task panicked")
}

/// Same offload for a partial, but via `try_acquire`: if the worker is busy
/// this tick's partial is skipped rather than queued (spec §5 backpressure).
async fn run_partial(
    state: &AppState,
    session: &RecognitionSession,
) -> Option<server_session::PartialOutput> {
    let _permit = state.worker.try_acquire().ok()?;
    let backend = state.backend.clone();
    let snapshot = session.clone();
    tokio::task::spawn_blocking(move || snapshot.process_partial(backend.as_ref()))
        .await
        .ok()
        .flatten()
}

fn truncate_sample(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() > 50 {
        let head: String = chars[..50].iter().collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

async fn handle_batch(mut socket: WebSocket, state: AppState) {
    // No strategy selector on the wire for /ws/transcribe: the original
    // server's batch entrypoint always conditions on previous_transcript
    // ("Batch transcription with prompt conditioning"), never on audio
    // context, so this is fixed to Strategy::Prompt.
    let mut session =
        RecognitionSession::with_config(Strategy::Prompt, SAMPLE_RATE, state.session_config.clone());

    while let Some(Ok(msg)) = socket.recv().await {
        let WsMessage::Text(text) = msg else {
            continue;
        };
        let parsed: Result<ClientMessage, _> = serde_json::from_str(text.as_str());
        let Ok(ClientMessage::Transcribe {
            audio,
            sample_rate,
            traceparent,
            ..
        }) = parsed
        else {
            warn!("ignoring malformed or non-transcribe message on batch endpoint");
            continue;
        };

        let samples = match decode_audio(&audio) {
            Ok(s) => s,
            Err(e) => {
                warn!(%e, "bad audio payload");
                continue;
            }
        };

        session.sample_rate = sample_rate;
        session.audio_buffer = samples;

        let (returned, outcome) = run_final(&state, session).await;
        session = returned;

        let Some(outcome) = outcome else {
            warn!("recognizer error on batch transcribe; dropping reply");
            continue;
        };

        let reply = match outcome {
            FinalOutcome::Accepted {
                text,
                segments,
                language,
                processing_time_ms,
            } => ServerMessage::Result {
                text,
                segments,
                language,
                processing_time_ms,
                traceparent,
            },
            FinalOutcome::Rejected { sample, .. } => ServerMessage::Noise {
                sample: truncate_sample(&sample),
            },
        };

        if send_json(&mut socket, &reply).await.is_err() {
            break;
        }
    }
}

async fn handle_streaming(mut socket: WebSocket, strategy_raw: String, state: AppState) {
    let strategy: Strategy = match strategy_raw.parse() {
        Ok(s) => s,
        Err(_) => {
            let _ = socket
                .send(WsMessage::Close(Some(CloseFrame {
                    code: 1008,
                    reason: format!("unknown strategy: {strategy_raw}").into(),
                })))
                .await;
            return;
        }
    };

    let mut session =
        RecognitionSession::with_config(strategy, SAMPLE_RATE, state.session_config.clone());

    while let Some(Ok(msg)) = socket.recv().await {
        let WsMessage::Text(text) = msg else {
            continue;
        };
        match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(ClientMessage::AudioFrame { audio, sample_rate }) => {
                let samples = match decode_audio(&audio) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(%e, "bad audio payload");
                        continue;
                    }
                };
                session.sample_rate = sample_rate;
                if session.on_audio_frame(&samples, Instant::now())
                    && let Some(partial) = run_partial(&state, &session).await
                {
                    let reply = ServerMessage::Partial {
                        text: partial.text,
                        processing_time_ms: partial.processing_time_ms,
                    };
                    if send_json(&mut socket, &reply).await.is_err() {
                        break;
                    }
                }
            }
            Ok(ClientMessage::VadEnd) => {
                session.on_vad_end();
                let (returned, outcome) = run_final(&state, session).await;
                session = returned;

                let Some(outcome) = outcome else {
                    warn!("recognizer error on streaming final; dropping");
                    continue;
                };

                let reply = match outcome {
                    FinalOutcome::Accepted {
                        text,
                        segments,
                        language,
                        processing_time_ms,
                    } => ServerMessage::Final {
                        text,
                        segments,
                        language,
                        processing_time_ms,
                        traceparent: None,
                    },
                    FinalOutcome::Rejected {
                        processing_time_ms, ..
                    } => ServerMessage::Final {
                        text: String::new(),
                        segments: vec![],
                        language: String::new(),
                        processing_time_ms,
                        traceparent: None,
                    },
                };

                if send_json(&mut socket, &reply).await.is_err() {
                    break;
                }
            }
            Ok(ClientMessage::Transcribe { .. }) => {
                warn!("ignoring batch-style transcribe message on streaming endpoint");
            }
            Err(e) => {
                warn!(%e, "malformed message");
            }
        }
    }
}

async fn send_json(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let payload = serde_json::to_string(message).expect("ServerMessage always serializes");
    socket.send(WsMessage::Text(payload.into())).await
}
