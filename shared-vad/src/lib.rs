//! Per-frame voice-activity classifiers selected by the `VAD_BACKEND` env var
//! (spec §6.3: `webrtc` or `silero`). Both backends consume whole 30 ms
//! (480-sample @ 16 kHz) frames reinterpreted as 16-bit signed PCM and
//! return a single speech/non-speech boolean for the frame, matching the
//! per-frame contract of spec §4.1 step 2.

#[cfg(feature = "webrtc")]
mod earshot_backend;
#[cfg(feature = "silero")]
mod silero_backend;

#[cfg(feature = "webrtc")]
pub use earshot_backend::EarshotVad;
#[cfg(feature = "silero")]
pub use silero_backend::SileroVad;

/// A stateful per-stream voice-activity detector.
///
/// One instance is owned per connection/utterance stream; `reset` clears
/// any internal history (ring buffers, recurrent state) without discarding
/// the instance.
pub trait VoiceActivityDetector: Send {
    /// Classify one 16-bit PCM frame at `sample_rate`. The frame length is
    /// whatever the caller's framing produces (spec default: 480 samples at
    /// 16 kHz / 30 ms); implementations that require a fixed internal frame
    /// size buffer across calls internally.
    fn is_speech(&mut self, frame: &[i16], sample_rate: u32) -> bool;

    fn reset(&mut self);
}
