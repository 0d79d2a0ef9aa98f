//! Microphone-cooldown window (spec §4.2): after a TTS reply begins, or the
//! agent response is received without TTS configured, incoming frames are
//! discarded and the Speech Gate held in reset until a deadline, so the
//! system does not transcribe its own playback.

use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct CooldownGate {
    until: Option<Instant>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self { until: None }
    }

    pub fn start(&mut self, now: Instant, duration: Duration) {
        self.until = Some(now + duration);
    }

    pub fn active(&self, now: Instant) -> bool {
        matches!(self.until, Some(deadline) if now < deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_before_start() {
        let gate = CooldownGate::new();
        assert!(!gate.active(Instant::now()));
    }

    #[test]
    fn active_immediately_after_start() {
        let mut gate = CooldownGate::new();
        let now = Instant::now();
        gate.start(now, Duration::from_millis(500));
        assert!(gate.active(now));
    }

    #[test]
    fn inactive_once_deadline_has_passed() {
        let mut gate = CooldownGate::new();
        let now = Instant::now();
        gate.start(now, Duration::from_millis(500));
        assert!(!gate.active(now + Duration::from_millis(501)));
    }
}
