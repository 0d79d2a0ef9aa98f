//! Per-frame VAD+energy fusion with onset debounce, silence counting, and a
//! max-duration safety cap (spec §4.1). A pure state machine driven by a
//! stream of float32 frames and a [`shared_vad::VoiceActivityDetector`] — no
//! transport, no I/O, so it is exercised directly in unit tests without a
//! live microphone or socket.

use shared_protocol::{
    FRAME_MS, MAX_SPEECH_MS, MIN_ENERGY, MIN_SPEECH_MS, ONSET_THRESHOLD, PAUSE_MS,
    SILENCE_THRESHOLD_MS,
};
use shared_vad::VoiceActivityDetector;

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub frame_ms: u32,
    pub onset_threshold: u32,
    pub silence_chunks: u32,
    pub pause_chunks: u32,
    pub max_speech_ms: u32,
    pub min_speech_ms: u32,
    pub min_energy: f32,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            frame_ms: FRAME_MS,
            onset_threshold: ONSET_THRESHOLD,
            silence_chunks: SILENCE_THRESHOLD_MS / FRAME_MS,
            pause_chunks: PAUSE_MS / FRAME_MS,
            max_speech_ms: MAX_SPEECH_MS,
            min_speech_ms: MIN_SPEECH_MS,
            min_energy: MIN_ENERGY,
        }
    }
}

/// Per-utterance aggregate (spec §3 `SpeechState`). `energy_count` always
/// equals `chunks.len()`; `chunks` is non-empty iff the gate has been
/// speaking since the last [`SpeechState::reset`].
#[derive(Debug, Clone, Default)]
pub struct SpeechState {
    pub is_speaking: bool,
    pub onset_count: u32,
    pub silence_count: u32,
    pub chunks: Vec<Vec<f32>>,
    pub energy_sum: f64,
    pub energy_count: u32,
    pub speech_start_frame: Option<u64>,
}

impl SpeechState {
    pub fn reset(&mut self) {
        *self = SpeechState::default();
    }

    fn start_speaking(&mut self, frame_index: u64) {
        self.is_speaking = true;
        self.speech_start_frame = Some(frame_index);
    }

    fn add_chunk(&mut self, frame: Vec<f32>, energy: f32) {
        self.energy_sum += energy as f64;
        self.energy_count += 1;
        self.chunks.push(frame);
    }

    pub fn avg_energy(&self) -> f32 {
        if self.energy_count == 0 {
            0.0
        } else {
            (self.energy_sum / self.energy_count as f64) as f32
        }
    }

    pub fn duration_ms(&self, frame_ms: u32) -> u32 {
        self.chunks.len() as u32 * frame_ms
    }

    /// All buffered audio, concatenated in arrival order.
    pub fn audio(&self) -> Vec<f32> {
        self.chunks.iter().flatten().copied().collect()
    }
}

fn rms(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = frame.iter().map(|&s| (s as f64) * (s as f64)).sum();
    ((sum_sq / frame.len() as f64).sqrt()) as f32
}

fn to_i16(frame: &[f32]) -> Vec<i16> {
    frame
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// The result of feeding one frame through the gate.
#[derive(Debug, Clone)]
pub enum GateEvent {
    /// No boundary reached; caller keeps feeding frames.
    Continue,
    /// Streaming mid-utterance cut (§4.1 "streaming variant"): send `samples`
    /// as a partial request, keep `is_speaking` true, start a new window.
    PartialBoundary { samples: Vec<f32> },
    /// Utterance boundary reached (quiet tail or max-duration cap).
    Finalized {
        samples: Vec<f32>,
        duration_ms: u32,
        avg_energy: f32,
        /// `false` when `duration_ms < min_speech_ms` or `avg_energy <
        /// min_energy` — caller should discard rather than transmit.
        accepted: bool,
    },
}

pub struct SpeechGate {
    config: GateConfig,
    vad: Box<dyn VoiceActivityDetector>,
    sample_rate: u32,
    streaming: bool,
    state: SpeechState,
    window: Vec<f32>,
    frame_counter: u64,
}

impl SpeechGate {
    pub fn new(
        vad: Box<dyn VoiceActivityDetector>,
        sample_rate: u32,
        config: GateConfig,
        streaming: bool,
    ) -> Self {
        Self {
            config,
            vad,
            sample_rate,
            streaming,
            state: SpeechState::default(),
            window: Vec::new(),
            frame_counter: 0,
        }
    }

    pub fn state(&self) -> &SpeechState {
        &self.state
    }

    /// Reset to a fresh utterance without emitting an event. Used when
    /// discarding a too-short/too-quiet finalized utterance, and by the
    /// client's cooldown window (spec §4.2).
    pub fn reset(&mut self) {
        self.state.reset();
        self.window.clear();
    }

    pub fn process_frame(&mut self, frame: &[f32]) -> GateEvent {
        let energy = rms(frame);
        let vad_speech = self.vad.is_speech(&to_i16(frame), self.sample_rate);
        let speech_detected = vad_speech && energy >= self.config.min_energy;

        if speech_detected {
            if !self.state.is_speaking {
                self.state.onset_count += 1;
                if self.state.onset_count >= self.config.onset_threshold {
                    self.state.start_speaking(self.frame_counter);
                }
            }
        } else {
            self.state.onset_count = 0;
        }
        self.frame_counter += 1;

        if !self.state.is_speaking {
            return GateEvent::Continue;
        }

        self.state.add_chunk(frame.to_vec(), energy);
        self.window.extend_from_slice(frame);

        if speech_detected {
            self.state.silence_count = 0;
        } else {
            self.state.silence_count += 1;
        }

        let duration_ms = self.state.duration_ms(self.config.frame_ms);
        if self.state.silence_count >= self.config.silence_chunks || duration_ms >= self.config.max_speech_ms
        {
            return self.finalize(duration_ms);
        }

        if self.streaming && self.state.silence_count == self.config.pause_chunks {
            let samples = std::mem::take(&mut self.window);
            return GateEvent::PartialBoundary { samples };
        }

        GateEvent::Continue
    }

    fn finalize(&mut self, duration_ms: u32) -> GateEvent {
        let avg_energy = self.state.avg_energy();
        let samples = if self.streaming {
            std::mem::take(&mut self.window)
        } else {
            self.state.audio()
        };
        let accepted = duration_ms >= self.config.min_speech_ms && avg_energy >= self.config.min_energy;
        self.reset();
        GateEvent::Finalized {
            samples,
            duration_ms,
            avg_energy,
            accepted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedVad(std::collections::VecDeque<bool>);

    impl VoiceActivityDetector for ScriptedVad {
        fn is_speech(&mut self, _frame: &[i16], _sample_rate: u32) -> bool {
            self.0.pop_front().unwrap_or(false)
        }
        fn reset(&mut self) {
            self.0.clear();
        }
    }

    fn frame(amplitude: f32) -> Vec<f32> {
        vec![amplitude; 480]
    }

    fn gate(script: Vec<bool>, streaming: bool) -> SpeechGate {
        gate_with_config(script, GateConfig::default(), streaming)
    }

    fn gate_with_config(script: Vec<bool>, config: GateConfig, streaming: bool) -> SpeechGate {
        let vad = Box::new(ScriptedVad(script.into()));
        SpeechGate::new(vad, 16_000, config, streaming)
    }

    #[test]
    fn onset_requires_consecutive_speech_frames() {
        let mut g = gate(vec![true, true, false, true, true], false);
        for _ in 0..5 {
            let ev = g.process_frame(&frame(0.5));
            assert!(matches!(ev, GateEvent::Continue));
        }
        assert!(!g.state().is_speaking);
    }

    #[test]
    fn three_consecutive_speech_frames_enter_speaking_state() {
        let mut g = gate(vec![true, true, true], false);
        g.process_frame(&frame(0.5));
        g.process_frame(&frame(0.5));
        g.process_frame(&frame(0.5));
        assert!(g.state().is_speaking);
    }

    #[test]
    fn quiet_tail_finalizes_and_accepts_long_enough_utterance() {
        let silence_chunks = GateConfig::default().silence_chunks;
        let mut script = vec![true; 3 + 20];
        for _ in 0..silence_chunks {
            script.push(false);
        }
        let total = script.len();
        let mut g = gate(script, false);
        let mut last = GateEvent::Continue;
        for _ in 0..total {
            last = g.process_frame(&frame(0.5));
        }
        match last {
            GateEvent::Finalized { accepted, .. } => assert!(accepted),
            _ => panic!("expected finalization"),
        }
        assert!(!g.state().is_speaking);
        assert_eq!(g.state().chunks.len(), 0);
    }

    #[test]
    fn too_short_utterance_is_not_accepted() {
        // A quiet tail long enough to trigger finalization (silence_chunks
        // frames) already exceeds the default min_speech_ms on its own, so
        // raise the threshold past what three speech frames plus the tail
        // can produce instead of shrinking the tail.
        let config = GateConfig {
            min_speech_ms: 5_000,
            ..GateConfig::default()
        };
        let mut script = vec![true, true, true];
        for _ in 0..config.silence_chunks {
            script.push(false);
        }
        let total = script.len();
        let mut g = gate_with_config(script, config.clone(), false);
        let mut last = GateEvent::Continue;
        for _ in 0..total {
            last = g.process_frame(&frame(0.5));
        }
        match last {
            GateEvent::Finalized {
                accepted,
                duration_ms,
                ..
            } => {
                assert!(!accepted);
                assert!(duration_ms < config.min_speech_ms);
            }
            _ => panic!("expected finalization"),
        }
    }

    #[test]
    fn max_speech_ms_finalizes_even_while_still_speech_detected() {
        // Onset debounce eats the first `onset_threshold - 1` frames before
        // any chunk is buffered, so reaching max_speech_ms worth of buffered
        // chunks needs that many extra speech frames up front.
        let config = GateConfig::default();
        let frames_needed =
            config.max_speech_ms / config.frame_ms + config.onset_threshold - 1;
        let script = vec![true; frames_needed as usize];
        let mut g = gate_with_config(script, config.clone(), false);
        let mut last = None;
        for _ in 0..frames_needed {
            match g.process_frame(&frame(0.5)) {
                ev @ GateEvent::Finalized { .. } => {
                    last = Some(ev);
                    break;
                }
                _ => {}
            }
        }
        match last {
            Some(GateEvent::Finalized { duration_ms, .. }) => {
                assert!(duration_ms >= config.max_speech_ms)
            }
            _ => panic!("expected finalization from the max-duration cap"),
        }
    }

    #[test]
    fn streaming_pause_emits_partial_boundary_before_final_silence() {
        let cfg = GateConfig::default();
        assert!(cfg.pause_chunks < cfg.silence_chunks);
        let mut script = vec![true; 3 + 5];
        for _ in 0..cfg.pause_chunks {
            script.push(false);
        }
        script.push(true); // resume speech after the pause cut
        let total = script.len();
        let mut g = gate(script, true);
        let mut saw_partial = false;
        for _ in 0..total {
            if let GateEvent::PartialBoundary { .. } = g.process_frame(&frame(0.5)) {
                saw_partial = true;
            }
        }
        assert!(saw_partial);
        assert!(g.state().is_speaking);
    }

    #[test]
    fn silent_frame_resets_onset_count() {
        let mut g = gate(vec![false], false);
        g.process_frame(&frame(0.0));
        assert_eq!(g.state().onset_count, 0);
    }
}
