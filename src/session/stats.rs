use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Statistics about a finished recognition run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognitionStats {
    /// Client uuid sent to the server
    pub uuid: String,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the last response was processed
    pub finished_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// Caller chunks streamed (first transmissions only)
    pub chunks_sent: usize,

    /// Audio bytes streamed (first transmissions only)
    pub bytes_sent: usize,

    /// Chunks transmitted again after reconnects
    pub chunks_resent: usize,

    /// Responses received
    pub responses: usize,

    /// Utterances delivered to the sink
    pub utterances: usize,

    /// Successful reconnects
    pub reconnects: u32,
}

impl RecognitionStats {
    pub fn chunks_per_second(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.chunks_sent as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}
