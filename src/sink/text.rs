use anyhow::Result;
use std::io::Write;

use super::Output;
use crate::session::{ResultSink, Utterance};

/// Prints each utterance's text, followed by its time span when known.
pub struct TextSink {
    out: Output,
}

impl TextSink {
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

impl ResultSink for TextSink {
    fn on_utterance(&self, utterance: &Utterance) -> Result<()> {
        if utterance.end_time > utterance.start_time {
            self.out.write_lines([
                utterance.text.clone(),
                format!("from {} to {}", utterance.start_time, utterance.end_time),
            ])
        } else {
            self.out.write_lines([&utterance.text])
        }
    }
}
