//! Wire types shared between the `client` and `transcriber` binaries.
//!
//! Messages are tagged JSON text frames (see spec §6.2); audio payloads are
//! base64-encoded little-endian float32 PCM, mono, at the rate named by the
//! message's own `sample_rate` field.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

pub const SAMPLE_RATE: u32 = 16_000;
pub const FRAME_MS: u32 = 30;
pub const FRAME_SAMPLES: u32 = SAMPLE_RATE * FRAME_MS / 1000; // 480

pub const ONSET_THRESHOLD: u32 = 3;
pub const SILENCE_THRESHOLD_MS: u32 = 1000;
pub const PAUSE_MS: u32 = 400;
pub const MAX_SPEECH_MS: u32 = 60_000;
pub const MIN_SPEECH_MS: u32 = 200;
pub const MIN_ENERGY: f32 = 0.01;

pub const CONTEXT_OVERLAP_MS: u32 = 1000;
pub const PARTIAL_MAX_MS: u32 = 3000;
pub const PARTIAL_INTERVAL_MS: u32 = 500;

pub const MAX_WS_MESSAGE_BYTES: usize = 10 * 1024 * 1024;
pub const RECONNECT_INTERVAL_SECS: u64 = 5;

/// Declarative conditioning record selected by a streaming session's path.
///
/// Strategies hold no per-connection state; `uses_prompt`/`uses_context` are
/// consulted by `server-session` on every final transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Prompt,
    Context,
    Hybrid,
}

impl Strategy {
    pub fn uses_prompt(self) -> bool {
        matches!(self, Strategy::Prompt | Strategy::Hybrid)
    }

    pub fn uses_context(self) -> bool {
        matches!(self, Strategy::Context | Strategy::Hybrid)
    }
}

#[derive(Debug, Error)]
#[error("unknown strategy {0:?}")]
pub struct UnknownStrategy(pub String);

impl FromStr for Strategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prompt" => Ok(Strategy::Prompt),
            "context" => Ok(Strategy::Context),
            "hybrid" => Ok(Strategy::Hybrid),
            other => Err(UnknownStrategy(other.to_string())),
        }
    }
}

/// `{start, end, text}` relative to the audio handed to the recognizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    AudioFrame {
        audio: String,
        sample_rate: u32,
    },
    VadEnd,
    Transcribe {
        audio: String,
        sample_rate: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        traceparent: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "partial")]
    Partial { text: String, processing_time_ms: f64 },
    #[serde(rename = "final")]
    Final {
        text: String,
        segments: Vec<Segment>,
        language: String,
        processing_time_ms: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        traceparent: Option<String>,
    },
    /// Batch-mode alias of `Final` — same shape, different tag (spec §6.2).
    #[serde(rename = "result")]
    Result {
        text: String,
        segments: Vec<Segment>,
        language: String,
        processing_time_ms: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        traceparent: Option<String>,
    },
    #[serde(rename = "noise")]
    Noise { sample: String },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("audio payload length {0} is not a multiple of 4 bytes")]
    Misaligned(usize),
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encode mono float32 samples as base64 little-endian bytes.
pub fn encode_audio(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 4);
    for &s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Decode a base64 little-endian float32 payload back into samples.
pub fn decode_audio(b64: &str) -> Result<Vec<f32>, ProtocolError> {
    let bytes = BASE64.decode(b64)?;
    if bytes.len() % 4 != 0 {
        return Err(ProtocolError::Misaligned(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// A W3C trace-context string of the form `00-<32hex>-<16hex>-01`.
pub fn format_traceparent(trace_id_hex32: &str, span_id_hex16: &str) -> String {
    format!("00-{trace_id_hex32}-{span_id_hex16}-01")
}

/// Validate (without interpreting) a `traceparent` header value.
pub fn is_valid_traceparent(s: &str) -> bool {
    let parts: Vec<&str> = s.split('-').collect();
    parts.len() == 4
        && parts[0].len() == 2
        && parts[1].len() == 32
        && parts[2].len() == 16
        && parts[3].len() == 2
        && parts.iter().all(|p| p.chars().all(|c| c.is_ascii_hexdigit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_round_trips_exactly() {
        let samples = vec![0.0_f32, 0.5, -0.5, 1.0, -1.0, 0.000_001];
        let encoded = encode_audio(&samples);
        let decoded = decode_audio(&encoded).unwrap();
        assert_eq!(samples, decoded);
    }

    #[test]
    fn misaligned_payload_is_rejected() {
        let b64 = BASE64.encode([0u8, 1, 2]);
        assert!(matches!(decode_audio(&b64), Err(ProtocolError::Misaligned(3))));
    }

    #[test]
    fn strategy_parses_from_path_segment() {
        assert_eq!("prompt".parse::<Strategy>().unwrap(), Strategy::Prompt);
        assert_eq!("context".parse::<Strategy>().unwrap(), Strategy::Context);
        assert_eq!("hybrid".parse::<Strategy>().unwrap(), Strategy::Hybrid);
        assert!("bogus".parse::<Strategy>().is_err());
    }

    #[test]
    fn capability_flags_match_strategy() {
        assert!(Strategy::Prompt.uses_prompt() && !Strategy::Prompt.uses_context());
        assert!(!Strategy::Context.uses_prompt() && Strategy::Context.uses_context());
        assert!(Strategy::Hybrid.uses_prompt() && Strategy::Hybrid.uses_context());
    }

    #[test]
    fn traceparent_validation() {
        assert!(is_valid_traceparent(
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01"
        ));
        assert!(!is_valid_traceparent("not-a-traceparent"));
    }

    #[test]
    fn client_message_tags_match_catalog() {
        let msg = ClientMessage::VadEnd;
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"vad_end"}"#);
    }
}
