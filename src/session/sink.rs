use anyhow::Result;
use bytes::Bytes;

use super::state::Utterance;
use crate::protocol::AddDataResponse;

/// Receives recognition results as the session drains responses.
///
/// Both methods run on the drain task, one response at a time, so
/// implementations see results in input order. An error is logged and
/// streaming continues.
pub trait ResultSink: Send + Sync {
    /// Intermediate (not end-of-utterance) response
    fn on_partial(&self, _response: &AddDataResponse) -> Result<()> {
        Ok(())
    }

    /// Completed utterance with the audio it was recognized from
    fn on_utterance(&self, utterance: &Utterance) -> Result<()>;
}

/// Adapts a closure taking `(text, start, end, chunks)`.
pub struct FnSink<F>(pub F);

impl<F> ResultSink for FnSink<F>
where
    F: Fn(&str, f64, f64, &[Bytes]) -> Result<()> + Send + Sync,
{
    fn on_utterance(&self, utterance: &Utterance) -> Result<()> {
        let audio: Vec<Bytes> = utterance.audio().cloned().collect();
        (self.0)(&utterance.text, utterance.start_time, utterance.end_time, &audio)
    }
}

/// Forwards to several sinks in order, stopping at the first error.
pub struct FanoutSink {
    sinks: Vec<Box<dyn ResultSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Box<dyn ResultSink>>) -> Self {
        Self { sinks }
    }
}

impl ResultSink for FanoutSink {
    fn on_partial(&self, response: &AddDataResponse) -> Result<()> {
        self.sinks.iter().try_for_each(|sink| sink.on_partial(response))
    }

    fn on_utterance(&self, utterance: &Utterance) -> Result<()> {
        self.sinks.iter().try_for_each(|sink| sink.on_utterance(utterance))
    }
}
