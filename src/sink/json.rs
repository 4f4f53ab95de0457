use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;

use super::Output;
use crate::session::{ResultSink, Utterance};

/// One JSON object per utterance, one per line.
pub struct JsonLinesSink {
    out: Output,
}

#[derive(Serialize)]
struct UtteranceRecord<'a> {
    text: &'a str,
    start_time: f64,
    end_time: f64,
    confidence: Option<f32>,
    first_chunk: usize,
    chunks: usize,
    audio_bytes: usize,
}

impl JsonLinesSink {
    pub fn stdout() -> Self {
        Self {
            out: Output::stdout(),
        }
    }

    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            out: Output::new(Box::new(writer)),
        }
    }
}

impl ResultSink for JsonLinesSink {
    fn on_utterance(&self, utterance: &Utterance) -> Result<()> {
        let record = UtteranceRecord {
            text: &utterance.text,
            start_time: utterance.start_time,
            end_time: utterance.end_time,
            confidence: utterance.response.best().map(|r| r.confidence),
            first_chunk: utterance.first_chunk,
            chunks: utterance.audio().count(),
            audio_bytes: utterance.audio_len(),
        };
        let line = serde_json::to_string(&record).context("Failed to serialize utterance")?;
        self.out.write_lines([line])
    }
}
