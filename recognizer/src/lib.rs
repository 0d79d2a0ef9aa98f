//! Normalizes a speech recognizer to one contract (spec §4.5):
//! `transcribe(samples, rate, initial_prompt?) -> TranscriptResult`.
//!
//! The `whisper` feature wires up a `whisper-rs`-backed adapter grounded on
//! the teacher's `transcriber::session::Session`; it is off by default
//! because `whisper-rs-sys`'s build script needs `libclang`, which this
//! sandbox does not have. [`ScriptedBackend`] is a deterministic test
//! double used by this crate's own tests and by `server-session`'s.

use shared_protocol::Segment;
use thiserror::Error;

#[cfg(feature = "whisper")]
mod whisper_backend;
#[cfg(feature = "whisper")]
pub use whisper_backend::WhisperBackend;

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptResult {
    pub text: String,
    pub segments: Vec<Segment>,
    pub language: String,
    pub processing_ms: f64,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("recognizer backend has not loaded a model yet")]
    NotLoaded,
    #[error("recognizer backend failed: {0}")]
    Transient(String),
}

/// Contract every recognizer family is adapted to (spec §4.5).
pub trait RecognitionBackend: Send + Sync {
    fn transcribe(
        &self,
        samples: &[f32],
        rate: u32,
        initial_prompt: Option<&str>,
    ) -> Result<TranscriptResult, BackendError>;

    /// The sample rate this backend's model was trained on.
    fn native_rate(&self) -> u32;
}

/// Deterministic linear-interpolation resample into a fresh buffer (spec §9
/// "Resampling"). A no-op copy when `from_rate == to_rate`.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = ((samples.len() as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos.floor() as usize;
        let frac = (src_pos - idx as f64) as f32;

        let s0 = samples[idx.min(samples.len() - 1)];
        let s1 = samples[(idx + 1).min(samples.len() - 1)];
        out.push(s0 + (s1 - s0) * frac);
    }

    out
}

/// Scripted, allocation-free test double: returns canned results in order,
/// or `BackendError::NotLoaded` once the script is exhausted (or if
/// `loaded` is false). Used across this workspace's unit tests in place of
/// a real model.
pub struct ScriptedBackend {
    responses: std::sync::Mutex<std::collections::VecDeque<Result<TranscriptResult, BackendError>>>,
    native_rate: u32,
    loaded: bool,
}

impl ScriptedBackend {
    pub fn new(native_rate: u32) -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::VecDeque::new()),
            native_rate,
            loaded: true,
        }
    }

    pub fn not_loaded(native_rate: u32) -> Self {
        Self {
            responses: std::sync::Mutex::new(std::collections::VecDeque::new()),
            native_rate,
            loaded: false,
        }
    }

    pub fn push(&self, result: Result<TranscriptResult, BackendError>) {
        self.responses.lock().unwrap().push_back(result);
    }

    pub fn push_ok(&self, result: TranscriptResult) {
        self.push(Ok(result));
    }
}

impl RecognitionBackend for ScriptedBackend {
    fn transcribe(
        &self,
        _samples: &[f32],
        _rate: u32,
        _initial_prompt: Option<&str>,
    ) -> Result<TranscriptResult, BackendError> {
        if !self.loaded {
            return Err(BackendError::NotLoaded);
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(BackendError::Transient("script exhausted".into())))
    }

    fn native_rate(&self) -> u32 {
        self.native_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_is_identity_when_rates_match() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample_linear(&samples, 16_000, 16_000), samples);
    }

    #[test]
    fn resample_doubles_length_when_doubling_rate() {
        let samples = vec![0.0, 1.0, 0.0, -1.0];
        let out = resample_linear(&samples, 8_000, 16_000);
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn resample_halves_length_when_halving_rate() {
        let samples = vec![0.0; 320];
        let out = resample_linear(&samples, 16_000, 8_000);
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn scripted_backend_reports_not_loaded() {
        let backend = ScriptedBackend::not_loaded(16_000);
        let err = backend.transcribe(&[0.0; 10], 16_000, None).unwrap_err();
        assert!(matches!(err, BackendError::NotLoaded));
    }

    #[test]
    fn scripted_backend_returns_pushed_results_in_order() {
        let backend = ScriptedBackend::new(16_000);
        backend.push_ok(TranscriptResult {
            text: "hello".into(),
            segments: vec![Segment {
                start: 0.0,
                end: 1.0,
                text: "hello".into(),
            }],
            language: "en".into(),
            processing_ms: 42.0,
        });
        let result = backend.transcribe(&[0.0; 10], 16_000, None).unwrap();
        assert_eq!(result.text, "hello");
    }
}
