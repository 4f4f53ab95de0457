//! Length-prefixed framing over a byte stream.
//!
//! Every record on the wire is `<hex length>\r\n<payload>`. The reader and
//! writer halves are separate types so that one task can keep streaming
//! audio while another drains responses.

use std::time::Duration;

use futures::FutureExt;
use tokio::io::{
    split, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
    ReadHalf, WriteHalf,
};
use tokio::time::{error::Elapsed, timeout};
use tracing::debug;

use crate::error::TransportError;

/// Longest accepted hex length header (enough for a `u64`).
pub const MAX_HEADER_DIGITS: usize = 16;

/// Upper bound on a single record.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Per-connection I/O limits.
#[derive(Debug, Clone)]
pub struct IoOptions {
    /// Longest a single read or write may stall before the peer is declared dead
    pub io_timeout: Duration,
    /// Consecutive transient faults tolerated per operation
    pub max_faults: u32,
    /// Log every frame at debug level
    pub verbose: bool,
}

impl Default for IoOptions {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_secs(8),
            max_faults: 0,
            verbose: false,
        }
    }
}

/// Encode the frame header for a payload of `len` bytes.
pub fn frame_header(len: usize) -> String {
    format!("{:x}\r\n", len)
}

fn is_transient(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
    )
}

/// Classify the outcome of one bounded I/O attempt. `Ok(None)` means the
/// fault was transient and the attempt should be repeated.
fn settle<T>(
    options: &IoOptions,
    outcome: Result<std::io::Result<T>, Elapsed>,
    faults: &mut u32,
) -> Result<Option<T>, TransportError> {
    match outcome {
        Err(_) => Err(TransportError::Timeout(options.io_timeout)),
        Ok(Ok(value)) => {
            *faults = 0;
            Ok(Some(value))
        }
        Ok(Err(e)) if is_transient(&e) && *faults < options.max_faults => {
            *faults += 1;
            debug!("Transient I/O fault {}/{}: {}", faults, options.max_faults, e);
            Ok(None)
        }
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(TransportError::ClosedByPeer)
        }
        Ok(Err(e)) => Err(TransportError::Io(e)),
    }
}

/// Reading side of a framed connection.
pub struct FramedReader<R> {
    inner: BufReader<R>,
    options: IoOptions,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(inner: R, options: IoOptions) -> Self {
        Self {
            inner: BufReader::new(inner),
            options,
        }
    }

    /// Read exactly `n` bytes, failing if the peer closes first.
    pub async fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        let mut faults = 0;
        while filled < n {
            let outcome = timeout(self.options.io_timeout, self.inner.read(&mut buf[filled..])).await;
            let Some(read) = settle(&self.options, outcome, &mut faults)? else {
                continue;
            };
            if read == 0 {
                return Err(TransportError::ClosedByPeer);
            }
            filled += read;
        }
        Ok(buf)
    }

    async fn read_byte(&mut self) -> Result<u8, TransportError> {
        let byte = self.read_exact(1).await?;
        Ok(byte[0])
    }

    /// Read one complete framed record.
    pub async fn read_framed(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut digits = String::new();
        loop {
            let byte = self.read_byte().await?;
            if byte == b'\r' {
                let lf = self.read_byte().await?;
                if lf != b'\n' {
                    return Err(TransportError::MalformedLength(format!(
                        "{}\\r{}",
                        digits,
                        char::from(lf)
                    )));
                }
                break;
            }
            if digits.len() >= MAX_HEADER_DIGITS {
                return Err(TransportError::HeaderTooLong(MAX_HEADER_DIGITS));
            }
            digits.push(char::from(byte));
        }

        let len = usize::from_str_radix(&digits, 16)
            .map_err(|_| TransportError::MalformedLength(digits.clone()))?;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge(len));
        }
        if self.options.verbose {
            debug!("Got message. Expecting {} bytes length.", len);
        }
        if len == 0 {
            return Ok(Vec::new());
        }
        self.read_exact(len).await
    }

    /// Read a record only if bytes are already waiting on the socket.
    ///
    /// Returns `Ok(None)` without blocking when nothing is readable. Once the
    /// first byte of a record is available the rest is read with the normal
    /// bounded waits.
    pub async fn try_read_framed(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let readable = match self.inner.fill_buf().now_or_never() {
            None => return Ok(None),
            Some(Ok(buffered)) => !buffered.is_empty(),
            Some(Err(e)) if is_transient(&e) => return Ok(None),
            Some(Err(e)) => return Err(TransportError::Io(e)),
        };
        if !readable {
            return Err(TransportError::ClosedByPeer);
        }
        self.read_framed().await.map(Some)
    }
}

/// Writing side of a framed connection.
pub struct FramedWriter<W> {
    inner: Option<W>,
    options: IoOptions,
}

impl<W: AsyncWrite + Unpin> FramedWriter<W> {
    pub fn new(inner: W, options: IoOptions) -> Self {
        Self {
            inner: Some(inner),
            options,
        }
    }

    /// Write all bytes and flush.
    pub async fn write_raw(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let inner = self.inner.as_mut().ok_or_else(|| {
            TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport already closed",
            ))
        })?;
        let mut written = 0;
        let mut faults = 0;
        while written < data.len() {
            let outcome = timeout(self.options.io_timeout, inner.write(&data[written..])).await;
            let Some(n) = settle(&self.options, outcome, &mut faults)? else {
                continue;
            };
            if n == 0 {
                return Err(TransportError::ClosedByPeer);
            }
            written += n;
        }
        loop {
            let outcome = timeout(self.options.io_timeout, inner.flush()).await;
            if settle(&self.options, outcome, &mut faults)?.is_some() {
                return Ok(());
            }
        }
    }

    /// Write `payload` as one framed record.
    pub async fn write_framed(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let mut frame = frame_header(payload.len()).into_bytes();
        frame.extend_from_slice(payload);
        self.write_raw(&frame).await?;
        if self.options.verbose {
            debug!("Send message size: {}", payload.len());
        }
        Ok(())
    }

    /// Shut the stream down. Calling it again is a no-op.
    pub async fn close(&mut self) {
        if let Some(mut inner) = self.inner.take() {
            if let Err(e) = inner.shutdown().await {
                debug!("Shutdown after close: {}", e);
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }
}

/// A full-duplex framed connection over one stream.
pub struct FramedTransport<S> {
    reader: FramedReader<ReadHalf<S>>,
    writer: FramedWriter<WriteHalf<S>>,
}

impl<S: AsyncRead + AsyncWrite> FramedTransport<S> {
    pub fn new(stream: S, options: IoOptions) -> Self {
        let (read_half, write_half) = split(stream);
        Self {
            reader: FramedReader::new(read_half, options.clone()),
            writer: FramedWriter::new(write_half, options),
        }
    }

    pub fn reader(&mut self) -> &mut FramedReader<ReadHalf<S>> {
        &mut self.reader
    }

    pub fn writer(&mut self) -> &mut FramedWriter<WriteHalf<S>> {
        &mut self.writer
    }

    /// Separate the halves so they can be driven from different tasks.
    pub fn into_split(self) -> (FramedReader<ReadHalf<S>>, FramedWriter<WriteHalf<S>>) {
        (self.reader, self.writer)
    }

    pub async fn close(&mut self) {
        self.writer.close().await;
    }
}
