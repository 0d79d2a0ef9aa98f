//! `whisper-rs`-backed adapter, grounded on the teacher's
//! `transcriber::session::Session`: same `FullParams`/`WhisperState` call
//! shape, generalized from the teacher's token-level segment extraction
//! (kept for two-stroke retranscription) down to the plain
//! `{start, end, text}` contract this workspace's protocol uses.

use crate::{BackendError, RecognitionBackend, TranscriptResult, resample_linear};
use shared_protocol::Segment;
use std::sync::Mutex;
use std::time::Instant;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, WhisperState};

const NATIVE_RATE: u32 = 16_000;

pub struct WhisperBackend {
    ctx: WhisperContext,
    state: Mutex<WhisperState>,
}

impl WhisperBackend {
    pub fn load(model_path: &str) -> Result<Self, BackendError> {
        let ctx = WhisperContext::new_with_params(model_path, WhisperContextParameters::default())
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        let state = ctx
            .create_state()
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        Ok(Self {
            ctx,
            state: Mutex::new(state),
        })
    }
}

impl RecognitionBackend for WhisperBackend {
    fn transcribe(
        &self,
        samples: &[f32],
        rate: u32,
        initial_prompt: Option<&str>,
    ) -> Result<TranscriptResult, BackendError> {
        let resampled = resample_linear(samples, rate, NATIVE_RATE);

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_suppress_nst(true);
        if let Some(prompt) = initial_prompt.filter(|p| !p.is_empty()) {
            params.set_initial_prompt(prompt);
        }

        let start = Instant::now();
        let mut state = self.state.lock().map_err(|_| BackendError::Transient("poisoned state lock".into()))?;
        state
            .full(params, &resampled)
            .map_err(|e| BackendError::Transient(e.to_string()))?;
        let processing_ms = start.elapsed().as_secs_f64() * 1000.0;

        let n_segments = state.full_n_segments();
        let mut segments = Vec::with_capacity(n_segments.max(0) as usize);
        for i in 0..n_segments {
            let text = state
                .full_get_segment_text(i)
                .map_err(|e| BackendError::Transient(e.to_string()))?;
            let start_cs = state.full_get_segment_t0(i);
            let end_cs = state.full_get_segment_t1(i);
            segments.push(Segment {
                start: start_cs as f64 / 100.0,
                end: end_cs as f64 / 100.0,
                text: text.trim().to_string(),
            });
        }

        let text = segments
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string();

        Ok(TranscriptResult {
            text,
            segments,
            language: self.ctx.full_lang_id_from_state(&state).map(|id| {
                whisper_rs::get_lang_str(id).unwrap_or("en").to_string()
            }).unwrap_or_else(|_| "en".to_string()),
            processing_ms,
        })
    }

    fn native_rate(&self) -> u32 {
        NATIVE_RATE
    }
}
