//! `webrtc` VAD backend. Grounded on the teacher's own `shared-vad` crate,
//! which wraps `earshot`'s neural detector (fixed 256-sample/16ms frames at
//! 16kHz) behind a leftover-sample ring buffer so callers can feed frames of
//! any length. Generalized here from a continuous probability curve (the
//! teacher's `probability_at_cs`) to the one-bool-per-frame contract §4.1
//! needs: each call reports whether the *latest* sub-frame classified as
//! speech.

use crate::VoiceActivityDetector;
use earshot::Detector;

const EARSHOT_FRAME: usize = 256; // 16ms at 16kHz, fixed by the detector

pub struct EarshotVad {
    detector: Detector,
    leftovers: Vec<i16>,
    threshold: f32,
    last_probability: f32,
}

impl Default for EarshotVad {
    fn default() -> Self {
        Self::new(0.5)
    }
}

impl EarshotVad {
    pub fn new(threshold: f32) -> Self {
        Self {
            detector: Detector::default(),
            leftovers: Vec::new(),
            threshold,
            last_probability: 0.0,
        }
    }
}

impl VoiceActivityDetector for EarshotVad {
    fn is_speech(&mut self, frame: &[i16], sample_rate: u32) -> bool {
        debug_assert_eq!(sample_rate, 16_000, "earshot backend is fixed at 16kHz");

        self.leftovers.extend_from_slice(frame);
        let mut pos = 0;
        while pos + EARSHOT_FRAME <= self.leftovers.len() {
            let chunk = &self.leftovers[pos..pos + EARSHOT_FRAME];
            self.last_probability = self.detector.predict_i16(chunk);
            pos += EARSHOT_FRAME;
        }
        self.leftovers.drain(0..pos);

        self.last_probability >= self.threshold
    }

    fn reset(&mut self) {
        self.detector = Detector::default();
        self.leftovers.clear();
        self.last_probability = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silent_frame_is_not_speech() {
        let mut vad = EarshotVad::default();
        let silence = vec![0i16; 480];
        assert!(!vad.is_speech(&silence, 16_000));
    }

    #[test]
    fn reset_clears_leftover_buffer() {
        let mut vad = EarshotVad::default();
        vad.is_speech(&[0i16; 100], 16_000);
        assert!(!vad.leftovers.is_empty());
        vad.reset();
        assert!(vad.leftovers.is_empty());
    }
}
