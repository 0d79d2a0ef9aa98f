//! Client Session host (spec §4.2, §6.3): parses the environment-driven
//! configuration, builds the Speech Gate and its VAD backend, starts the
//! Frame Source worker, and dispatches into the batch or streaming run loop.
//! Structured the way the teacher's `transcriber/src/main.rs` wires up its
//! own `AppState` from parsed `Args`.

mod agent;
mod cooldown;
mod frame_source;
mod latency;
mod session;
mod transport;
mod tts;

use clap::Parser;
use frame_source::spawn_frame_worker;
use latency::LatencyStats;
use session::{ClientMode, SessionConfig, Sinks};
use shared_protocol::{SAMPLE_RATE, Strategy};
#[cfg(feature = "audio")]
use shared_protocol::FRAME_SAMPLES;
use shared_vad::VoiceActivityDetector;
use speech_gate::{GateConfig, SpeechGate};
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug, Clone)]
#[command(name = "client")]
struct Args {
    #[arg(long, env = "SERVER_URL", default_value = "ws://127.0.0.1:8765")]
    server_url: String,

    #[arg(long, env = "CLIENT_MODE", default_value = "batch")]
    client_mode: String,

    #[arg(long, env = "STRATEGY", default_value = "prompt")]
    strategy: String,

    #[arg(long, env = "MIN_ENERGY", default_value_t = shared_protocol::MIN_ENERGY)]
    min_energy: f32,

    #[arg(long, env = "SILENCE_MS", default_value_t = shared_protocol::SILENCE_THRESHOLD_MS)]
    silence_ms: u32,

    #[arg(long, env = "PAUSE_MS", default_value_t = shared_protocol::PAUSE_MS)]
    pause_ms: u32,

    #[arg(long, env = "MAX_SPEECH_MS", default_value_t = shared_protocol::MAX_SPEECH_MS)]
    max_speech_ms: u32,

    #[arg(long, env = "VAD_BACKEND", default_value = "webrtc")]
    vad_backend: String,

    #[arg(long, env = "AGENT_URL")]
    agent_url: Option<String>,

    #[arg(long, env = "AGENT_COOLDOWN_MS", default_value_t = 2000)]
    agent_cooldown_ms: u64,

    #[arg(long, env = "TTS_URL")]
    tts_url: Option<String>,

    #[arg(long, env = "TTS_VOICE", default_value = "default")]
    tts_voice: String,
}

#[cfg(feature = "silero")]
fn load_silero() -> anyhow::Result<Box<dyn VoiceActivityDetector>> {
    let path = std::env::var("SILERO_MODEL_PATH")
        .map_err(|_| anyhow::anyhow!("VAD_BACKEND=silero requires SILERO_MODEL_PATH"))?;
    let vad = shared_vad::SileroVad::load(path, 0.5)
        .map_err(|e| anyhow::anyhow!("failed to load silero model: {e}"))?;
    Ok(Box::new(vad))
}

#[cfg(not(feature = "silero"))]
fn load_silero() -> anyhow::Result<Box<dyn VoiceActivityDetector>> {
    anyhow::bail!("client was built without the `silero` feature; rebuild with `--features silero`")
}

fn load_vad(backend: &str) -> anyhow::Result<Box<dyn VoiceActivityDetector>> {
    match backend {
        "webrtc" => Ok(Box::new(shared_vad::EarshotVad::default())),
        "silero" => load_silero(),
        other => anyhow::bail!("unknown VAD_BACKEND {other:?}, expected webrtc or silero"),
    }
}

#[cfg(feature = "audio")]
fn open_frame_source() -> anyhow::Result<Box<dyn frame_source::FrameSource>> {
    let source = frame_source::CpalFrameSource::default_input(SAMPLE_RATE, FRAME_SAMPLES as usize)?;
    Ok(Box::new(source))
}

#[cfg(not(feature = "audio"))]
fn open_frame_source() -> anyhow::Result<Box<dyn frame_source::FrameSource>> {
    anyhow::bail!("client was built without the `audio` feature; rebuild with `--features audio`")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let args = Args::parse();

    let mode = match args.client_mode.as_str() {
        "batch" => ClientMode::Batch,
        "streaming" => ClientMode::Streaming,
        other => anyhow::bail!("unknown CLIENT_MODE {other:?}, expected batch or streaming"),
    };
    let strategy: Strategy = args
        .strategy
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid STRATEGY: {e}"))?;
    let streaming = matches!(mode, ClientMode::Streaming);

    info!(backend = %args.vad_backend, "loading VAD backend");
    let vad = load_vad(&args.vad_backend)?;

    let gate_config = GateConfig {
        silence_chunks: args.silence_ms / shared_protocol::FRAME_MS,
        pause_chunks: args.pause_ms / shared_protocol::FRAME_MS,
        max_speech_ms: args.max_speech_ms,
        min_energy: args.min_energy,
        ..GateConfig::default()
    };
    let gate = SpeechGate::new(vad, SAMPLE_RATE, gate_config, streaming);

    info!("opening audio input");
    let source = open_frame_source()?;
    let frames = spawn_frame_worker(source, Duration::from_millis(200));

    let sinks = Sinks {
        agent: args.agent_url.clone().map(agent::AgentClient::new),
        tts: args.tts_url.clone().map(|url| tts::TtsClient::new(url, args.tts_voice.clone())),
    };

    let cfg = SessionConfig {
        server_url: args.server_url.clone(),
        mode,
        strategy,
        sample_rate: SAMPLE_RATE,
        reconnect_interval: Duration::from_secs(shared_protocol::RECONNECT_INTERVAL_SECS),
        agent_cooldown: Duration::from_millis(args.agent_cooldown_ms),
    };

    info!(server = %args.server_url, mode = %args.client_mode, strategy = %args.strategy, "starting client session");
    match cfg.mode {
        ClientMode::Batch => session::run_batch(cfg, gate, frames, sinks, LatencyStats::new()).await,
        ClientMode::Streaming => session::run_streaming(cfg, gate, frames, sinks, LatencyStats::new()).await,
    }

    Ok(())
}
