//! Ready-made result sinks for the command line and for library users.

mod detailed;
mod json;
mod splitter;
mod text;

pub use detailed::DetailedSink;
pub use json::JsonLinesSink;
pub use splitter::SplitterSink;
pub use text::TextSink;

use anyhow::{anyhow, Result};
use std::io::Write;
use std::sync::Mutex;

/// Shared line-oriented output used by the printing sinks.
pub(crate) struct Output {
    inner: Mutex<Box<dyn Write + Send>>,
}

impl Output {
    pub(crate) fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }

    pub(crate) fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Write all lines under one lock so concurrent sinks never interleave.
    pub(crate) fn write_lines<I, S>(&self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = self
            .inner
            .lock()
            .map_err(|_| anyhow!("Output lock poisoned"))?;
        for line in lines {
            writeln!(out, "{}", line.as_ref())?;
        }
        out.flush()?;
        Ok(())
    }
}
