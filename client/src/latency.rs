//! Per-utterance latency log (SPEC_FULL.md "Supplemented features"), ported
//! from the Python original's `LatencyStats` (`client/main.py`). Not a full
//! aggregator service — just the rolling summary the teacher's own
//! `session.rs` logs ("took {duration}s at {rtx}x"), adapted to this
//! pipeline's end-to-end and first-partial timings.

#[derive(Debug, Default)]
pub struct LatencyStats {
    e2e_ms: Vec<f64>,
    first_ms: Vec<f64>,
}

impl LatencyStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, e2e_ms: f64, first_ms: Option<f64>) {
        self.e2e_ms.push(e2e_ms);
        if let Some(first) = first_ms {
            self.first_ms.push(first);
        }
    }

    pub fn summary(&self) -> String {
        if self.e2e_ms.is_empty() {
            return "no utterances yet".to_string();
        }
        let n = self.e2e_ms.len();
        let avg_e2e = self.e2e_ms.iter().sum::<f64>() / n as f64;
        let mut out = format!("utterances: {n} | avg e2e: {avg_e2e:.0}ms");
        if !self.first_ms.is_empty() {
            let avg_first = self.first_ms.iter().sum::<f64>() / self.first_ms.len() as f64;
            out.push_str(&format!(" | avg first result: {avg_first:.0}ms"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_summary_before_any_utterance() {
        assert_eq!(LatencyStats::new().summary(), "no utterances yet");
    }

    #[test]
    fn summary_averages_recorded_timings() {
        let mut stats = LatencyStats::new();
        stats.record(100.0, Some(40.0));
        stats.record(200.0, Some(60.0));
        assert_eq!(stats.summary(), "utterances: 2 | avg e2e: 150ms | avg first result: 50ms");
    }
}
