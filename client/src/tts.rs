//! Text-to-speech sink (spec §1: "an abstract sink the client may invoke on
//! reply text"; out of core scope). Grounded on `TtsClient` in the Python
//! original's `client/tts.py`: a WebSocket request carrying `{text, voice}`,
//! replied to with streamed binary PCM frames. Playback itself only happens
//! under the `audio` feature, via the same `rodio::buffer::SamplesBuffer`
//! pattern `Rapheal7-My-Agent`'s `voice::audio` uses for its output sink.

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

const TTS_SAMPLE_RATE: u32 = 24_000;

pub struct TtsClient {
    url: String,
    voice: String,
}

impl TtsClient {
    pub fn new(url: String, voice: String) -> Self {
        Self { url, voice }
    }

    /// Stream `text` (or `ssml` if present) through the TTS service and play
    /// it back. Returns the played duration, used to size the cooldown
    /// window (spec §4.2). `Duration::ZERO` on any failure or empty input.
    pub async fn speak(
        &self,
        text: &str,
        ssml: Option<&str>,
        traceparent: Option<&str>,
        session_id: Option<&str>,
    ) -> Duration {
        if text.trim().is_empty() {
            return Duration::ZERO;
        }

        info!("[tts] sending: {}", preview(text));

        let (mut stream, _) = match connect_async(&self.url).await {
            Ok(s) => s,
            Err(e) => {
                warn!(%e, "[tts] connection error");
                return Duration::ZERO;
            }
        };

        let mut request = json!({
            "text": text,
            "voice": self.voice,
            "output_format": "raw-24khz-16bit-mono-pcm",
        });
        if let Some(ssml) = ssml {
            request["ssml"] = json!(ssml);
        }
        if let Some(tp) = traceparent {
            request["traceparent"] = json!(tp);
        }
        if let Some(sid) = session_id {
            request["session_id"] = json!(sid);
        }

        if stream.send(Message::Text(request.to_string())).await.is_err() {
            return Duration::ZERO;
        }

        let mut pcm: Vec<u8> = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(60);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                warn!("[tts] connection timeout");
                break;
            }
            match tokio::time::timeout(remaining, stream.next()).await {
                Ok(Some(Ok(Message::Binary(chunk)))) => {
                    if chunk.is_empty() {
                        break;
                    }
                    pcm.extend_from_slice(&chunk);
                }
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
                Ok(Some(Ok(_))) => continue,
                Ok(Some(Err(e))) => {
                    warn!(%e, "[tts] connection error");
                    break;
                }
                Err(_) => {
                    warn!("[tts] connection timeout");
                    break;
                }
            }
        }

        let sample_count = pcm.len() / 2;
        let duration = Duration::from_secs_f64(sample_count as f64 / TTS_SAMPLE_RATE as f64);
        play(&pcm);
        info!("[tts] done: {:.1}s audio", duration.as_secs_f64());
        duration
    }
}

fn preview(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() > 50 {
        format!("{}...", chars[..50].iter().collect::<String>())
    } else {
        text.to_string()
    }
}

#[cfg(feature = "audio")]
fn play(pcm_le_i16: &[u8]) {
    let samples: Vec<i16> = pcm_le_i16
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();
    if samples.is_empty() {
        return;
    }
    let (stream, handle) = match rodio::OutputStream::try_default() {
        Ok(pair) => pair,
        Err(e) => {
            warn!(%e, "[tts] no output device");
            return;
        }
    };
    let sink = match rodio::Sink::try_new(&handle) {
        Ok(sink) => sink,
        Err(e) => {
            warn!(%e, "[tts] playback init failed");
            return;
        }
    };
    let source = rodio::buffer::SamplesBuffer::new(1, TTS_SAMPLE_RATE, samples);
    sink.append(source);
    sink.sleep_until_end();
    drop(stream);
}

#[cfg(not(feature = "audio"))]
fn play(_pcm_le_i16: &[u8]) {
    // Built without the `audio` feature: no output device is opened, so
    // playback is a no-op and cooldown sizing is the only observable effect.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_text() {
        let long = "a".repeat(80);
        assert_eq!(preview(&long).chars().count(), 53);
    }

    #[test]
    fn preview_keeps_short_text_unchanged() {
        assert_eq!(preview("hi"), "hi");
    }
}
