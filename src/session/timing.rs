//! Keeps utterance boundaries monotonic across a recognition run.
//!
//! The server reports times relative to its own notion of the stream start,
//! which restarts when a connection is re-established. Every flushed
//! utterance is shifted so that it never begins before the previous one
//! ended.

/// Timing correction state for one recognition run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UtteranceTimer {
    last_end_time: f64,
    correction_delta: f64,
}

impl UtteranceTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map raw server bounds to run-relative bounds.
    pub fn correct(&mut self, start: f64, end: f64) -> (f64, f64) {
        let mut adjusted_start = start + self.correction_delta;
        let mut adjusted_end = end + self.correction_delta;

        if adjusted_start < self.last_end_time {
            self.correction_delta = self.last_end_time;
            adjusted_start = start + self.correction_delta;
            adjusted_end = end + self.correction_delta;
        }

        self.last_end_time = adjusted_end;
        (adjusted_start, adjusted_end)
    }

    pub fn last_end_time(&self) -> f64 {
        self.last_end_time
    }

    pub fn correction_delta(&self) -> f64 {
        self.correction_delta
    }
}
