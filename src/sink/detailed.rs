use anyhow::Result;
use std::io::Write;

use super::Output;
use crate::protocol::{AddDataResponse, AlignInfo};
use crate::session::{ResultSink, Utterance};

/// Dumps every response: all candidates with confidences and timings, and
/// the per-word breakdown of each.
pub struct DetailedSink {
    out: Output,
}

impl DetailedSink {
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

    fn describe(response: &AddDataResponse) -> Vec<String> {
        let mut lines = vec![
            "Got response:".to_string(),
            format!("end-of-utterance = {}", response.is_end_of_utterance()),
        ];

        for (r, candidate) in response.recognition.iter().enumerate() {
            lines.push(format!(
                "recognition[{}] = {}; confidence = {}",
                r,
                candidate.text(),
                candidate.confidence
            ));
            lines.push(format!("utterance timings: {}", span(candidate.align_info.as_ref())));

            for (w, word) in candidate.words.iter().enumerate() {
                lines.push(format!(
                    "word[{}] = {}; confidence = {}",
                    w, word.value, word.confidence
                ));
                lines.push(format!("word timings: {}", span(word.align_info.as_ref())));
            }
        }
        lines
    }
}

fn span(info: Option<&AlignInfo>) -> String {
    let (start, end) = info
        .map(|i| (i.start_time.unwrap_or(0.0), i.end_time.unwrap_or(0.0)))
        .unwrap_or((0.0, 0.0));
    format!("from {} to {}", start, end)
}

impl ResultSink for DetailedSink {
    fn on_partial(&self, response: &AddDataResponse) -> Result<()> {
        self.out.write_lines(Self::describe(response))
    }

    fn on_utterance(&self, utterance: &Utterance) -> Result<()> {
        let mut lines = Self::describe(&utterance.response);
        lines.push(format!(
            "corrected timings: from {} to {} ({} chunks starting at {})",
            utterance.start_time,
            utterance.end_time,
            utterance.chunks.len(),
            utterance.first_chunk
        ));
        self.out.write_lines(lines)
    }
}
