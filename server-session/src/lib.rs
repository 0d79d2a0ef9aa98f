//! Per-connection recognition session (spec §4.4 / §3 `RecognitionSession`):
//! audio accumulation, prompt/context conditioning, context-overlap
//! trimming, and hallucination filtering. Exclusively owned by one
//! connection handler — no locking, no shared mutation.

use hallucination::{clean_hallucination, dedup_repeated_phrases};
use recognizer::RecognitionBackend;
use shared_protocol::{
    CONTEXT_OVERLAP_MS, PARTIAL_INTERVAL_MS, PARTIAL_MAX_MS, Segment, Strategy,
};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub partial_interval_ms: u32,
    pub partial_max_ms: u32,
    pub context_overlap_ms: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            partial_interval_ms: PARTIAL_INTERVAL_MS,
            partial_max_ms: PARTIAL_MAX_MS,
            context_overlap_ms: CONTEXT_OVERLAP_MS,
        }
    }
}

#[derive(Clone)]
pub struct RecognitionSession {
    pub strategy: Strategy,
    pub previous_transcript: String,
    pub context_audio: Vec<f32>,
    pub audio_buffer: Vec<f32>,
    pub sample_rate: u32,
    config: SessionConfig,
    last_partial_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartialOutput {
    pub text: String,
    pub processing_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalOutcome {
    Accepted {
        text: String,
        segments: Vec<Segment>,
        language: String,
        processing_time_ms: f64,
    },
    /// Hallucination filter rejected the candidate text. `sample` is the
    /// pre-filter candidate (spec scenario 2's `{type:"noise", sample}`).
    Rejected {
        sample: String,
        processing_time_ms: f64,
    },
}

impl RecognitionSession {
    pub fn new(strategy: Strategy, sample_rate: u32) -> Self {
        Self::with_config(strategy, sample_rate, SessionConfig::default())
    }

    pub fn with_config(strategy: Strategy, sample_rate: u32, config: SessionConfig) -> Self {
        Self {
            strategy,
            previous_transcript: String::new(),
            context_audio: Vec::new(),
            audio_buffer: Vec::new(),
            sample_rate,
            config,
            last_partial_at: None,
        }
    }

    /// Append an `audio_frame` payload. Returns whether a partial should be
    /// scheduled: `partial_interval_ms` has elapsed since the last one (or
    /// none has been sent yet) and the buffer is non-empty.
    pub fn on_audio_frame(&mut self, samples: &[f32], now: Instant) -> bool {
        self.audio_buffer.extend_from_slice(samples);

        let due = match self.last_partial_at {
            None => true,
            Some(last) => now.duration_since(last).as_millis() as u32 >= self.config.partial_interval_ms,
        };

        if due && !self.audio_buffer.is_empty() {
            self.last_partial_at = Some(now);
            true
        } else {
            false
        }
    }

    /// Handle `vad_end`. Resets the partial timer and always signals that a
    /// final should be scheduled (spec §8: "two back-to-back `vad_end`
    /// messages: the second returns an empty `final`") — `process_final`
    /// itself produces that empty outcome without a backend call when the
    /// buffer is empty.
    pub fn on_vad_end(&mut self) -> bool {
        self.last_partial_at = None;
        true
    }

    fn partial_window(&self) -> &[f32] {
        let max_samples = (self.config.partial_max_ms as usize * self.sample_rate as usize) / 1000;
        let start = self.audio_buffer.len().saturating_sub(max_samples);
        &self.audio_buffer[start..]
    }

    fn prompt(&self) -> Option<&str> {
        if self.strategy.uses_prompt() && !self.previous_transcript.is_empty() {
            Some(self.previous_transcript.as_str())
        } else {
            None
        }
    }

    /// Sliding-window partial transcription. Does not mutate
    /// `previous_transcript`, `context_audio`, or `audio_buffer`. Returns
    /// `None` on an empty buffer or a backend error (spec §7: dropped, no
    /// in-band error).
    pub fn process_partial(&self, backend: &dyn RecognitionBackend) -> Option<PartialOutput> {
        if self.audio_buffer.is_empty() {
            return None;
        }
        let window = self.partial_window();
        let result = backend.transcribe(window, self.sample_rate, self.prompt()).ok()?;
        let text = dedup_repeated_phrases(&result.text, 3);
        Some(PartialOutput {
            text,
            processing_time_ms: result.processing_ms,
        })
    }

    /// Full finalization path (spec §4.4 "Final path"). Always clears
    /// `audio_buffer` and rolls `context_audio` forward, whether the result
    /// is accepted or rejected. Returns `None` on a backend error (the
    /// buffer is left untouched so the caller can decide whether to retry
    /// or drop the utterance).
    pub fn process_final(&mut self, backend: &dyn RecognitionBackend) -> Option<FinalOutcome> {
        if self.audio_buffer.is_empty() {
            return Some(FinalOutcome::Accepted {
                text: String::new(),
                segments: Vec::new(),
                language: String::new(),
                processing_time_ms: 0.0,
            });
        }

        let context_duration_s = self.context_audio.len() as f64 / self.sample_rate as f64;
        let use_context = self.strategy.uses_context() && !self.context_audio.is_empty();

        let mut input = Vec::with_capacity(self.context_audio.len() + self.audio_buffer.len());
        if use_context {
            input.extend_from_slice(&self.context_audio);
        }
        input.extend_from_slice(&self.audio_buffer);

        let result = backend.transcribe(&input, self.sample_rate, self.prompt()).ok()?;

        let (candidate_text, segments) = if use_context {
            let kept: Vec<Segment> = result
                .segments
                .into_iter()
                .filter(|s| s.end > context_duration_s)
                .map(|mut s| {
                    s.start = (s.start - context_duration_s).max(0.0);
                    s.end -= context_duration_s;
                    s
                })
                .collect();
            let text = kept
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            (text, kept)
        } else {
            (result.text, result.segments)
        };

        let outcome = match clean_hallucination(&candidate_text) {
            Some(accepted) if !accepted.is_empty() => {
                self.previous_transcript = accepted.clone();
                FinalOutcome::Accepted {
                    text: accepted,
                    segments,
                    language: result.language,
                    processing_time_ms: result.processing_ms,
                }
            }
            _ => FinalOutcome::Rejected {
                sample: candidate_text,
                processing_time_ms: result.processing_ms,
            },
        };

        let overlap_samples = (self.config.context_overlap_ms as usize * self.sample_rate as usize) / 1000;
        let tail_start = self.audio_buffer.len().saturating_sub(overlap_samples);
        self.context_audio = self.audio_buffer[tail_start..].to_vec();
        self.audio_buffer.clear();

        Some(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recognizer::{ScriptedBackend, TranscriptResult};

    fn silence(n: usize) -> Vec<f32> {
        vec![0.0; n]
    }

    #[test]
    fn batch_happy_path_updates_previous_transcript() {
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

        let mut session = RecognitionSession::new(Strategy::Prompt, 16_000);
        session.audio_buffer = silence(16_000);

        let outcome = session.process_final(&backend).unwrap();
        match outcome {
            FinalOutcome::Accepted { text, language, processing_time_ms, .. } => {
                assert_eq!(text, "hello");
                assert_eq!(language, "en");
                assert_eq!(processing_time_ms, 42.0);
            }
            _ => panic!("expected acceptance"),
        }
        assert_eq!(session.previous_transcript, "hello");
        assert!(session.audio_buffer.is_empty());
    }

    #[test]
    fn hallucination_rejection_leaves_previous_transcript_unchanged() {
        let backend = ScriptedBackend::new(16_000);
        backend.push_ok(TranscriptResult {
            text: "lililili lili lili lili lili".into(),
            segments: vec![],
            language: "en".into(),
            processing_ms: 10.0,
        });

        let mut session = RecognitionSession::new(Strategy::Prompt, 16_000);
        session.previous_transcript = "previous".into();
        session.audio_buffer = silence(16_000);

        let outcome = session.process_final(&backend).unwrap();
        match outcome {
            FinalOutcome::Rejected { sample, .. } => {
                assert_eq!(sample, "lililili lili lili lili lili");
            }
            _ => panic!("expected rejection"),
        }
        assert_eq!(session.previous_transcript, "previous");
    }

    #[test]
    fn context_strategy_trims_and_rebases_segments() {
        let backend = ScriptedBackend::new(16_000);
        backend.push_ok(TranscriptResult {
            text: "old new words".into(),
            segments: vec![
                Segment { start: 0.0, end: 0.5, text: "old".into() },
                Segment { start: 0.5, end: 1.0, text: "new".into() },
                Segment { start: 1.0, end: 1.5, text: "words".into() },
            ],
            language: "en".into(),
            processing_ms: 5.0,
        });

        let mut session = RecognitionSession::new(Strategy::Context, 16_000);
        session.context_audio = silence(16_000 / 2); // 0.5s
        session.audio_buffer = silence(16_000); // 1.0s of new audio since the overlap

        let outcome = session.process_final(&backend).unwrap();
        match outcome {
            FinalOutcome::Accepted { text, segments, .. } => {
                assert_eq!(text, "new words");
                assert_eq!(
                    segments,
                    vec![
                        Segment { start: 0.0, end: 0.5, text: "new".into() },
                        Segment { start: 0.5, end: 1.0, text: "words".into() },
                    ]
                );
                assert!(segments.iter().all(|s| s.start >= 0.0));
            }
            _ => panic!("expected acceptance"),
        }
    }

    #[test]
    fn dedup_applied_to_partial_text() {
        let backend = ScriptedBackend::new(16_000);
        backend.push_ok(TranscriptResult {
            text: "the cat the cat the cat the cat the cat".into(),
            segments: vec![],
            language: "en".into(),
            processing_ms: 1.0,
        });

        let mut session = RecognitionSession::new(Strategy::Prompt, 16_000);
        session.audio_buffer = silence(16_000);

        let partial = session.process_partial(&backend).unwrap();
        assert_eq!(partial.text, "the cat");
        // partial must not mutate session state
        assert_eq!(session.previous_transcript, "");
        assert_eq!(session.audio_buffer.len(), 16_000);
    }

    #[test]
    fn audio_buffer_empty_after_vad_end_and_final() {
        let backend = ScriptedBackend::new(16_000);
        backend.push_ok(TranscriptResult {
            text: "hi".into(),
            segments: vec![],
            language: "en".into(),
            processing_ms: 1.0,
        });

        let mut session = RecognitionSession::new(Strategy::Prompt, 16_000);
        session.audio_buffer = silence(480);
        assert!(session.on_vad_end());
        session.process_final(&backend);
        assert!(session.audio_buffer.is_empty());
    }

    #[test]
    fn second_back_to_back_vad_end_returns_empty_final() {
        let backend = ScriptedBackend::new(16_000);
        backend.push_ok(TranscriptResult {
            text: "hi".into(),
            segments: vec![],
            language: "en".into(),
            processing_ms: 1.0,
        });

        let mut session = RecognitionSession::new(Strategy::Prompt, 16_000);
        session.audio_buffer = silence(480);
        assert!(session.on_vad_end());
        session.process_final(&backend);

        assert!(session.on_vad_end());
        let outcome = session.process_final(&backend).unwrap();
        assert_eq!(
            outcome,
            FinalOutcome::Accepted {
                text: String::new(),
                segments: vec![],
                language: String::new(),
                processing_time_ms: 0.0,
            }
        );
    }

    #[test]
    fn backend_error_on_final_leaves_buffer_untouched() {
        let backend = ScriptedBackend::new(16_000);
        let mut session = RecognitionSession::new(Strategy::Prompt, 16_000);
        session.audio_buffer = silence(480);
        let result = session.process_final(&backend);
        assert!(result.is_none());
        assert_eq!(session.audio_buffer.len(), 480);
    }
}
