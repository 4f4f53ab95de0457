// Integration tests for the framed transport
//
// These tests run both ends of a framed connection over an in-memory pipe
// and verify record boundaries, header validation and peer-close handling.

use anyhow::Result;
use asr_stream::error::TransportError;
use asr_stream::transport::{FramedReader, FramedTransport, FramedWriter, IoOptions};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{duplex, AsyncRead, AsyncWriteExt, DuplexStream, ReadBuf};

fn pair() -> (FramedTransport<DuplexStream>, FramedTransport<DuplexStream>) {
    let (a, b) = duplex(1 << 20);
    (
        FramedTransport::new(a, IoOptions::default()),
        FramedTransport::new(b, IoOptions::default()),
    )
}

/// Reader that fails with `Interrupted` a fixed number of times before
/// serving its data.
struct FlakyReader {
    faults: u32,
    data: Vec<u8>,
    pos: usize,
}

impl FlakyReader {
    fn new(faults: u32, data: &[u8]) -> Self {
        Self {
            faults,
            data: data.to_vec(),
            pos: 0,
        }
    }
}

impl AsyncRead for FlakyReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if this.faults > 0 {
            this.faults -= 1;
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::Interrupted, "flaky")));
        }
        let n = buf.remaining().min(this.data.len() - this.pos);
        buf.put_slice(&this.data[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_records_keep_their_boundaries() -> Result<()> {
    let (mut client, mut server) = pair();

    let payloads: Vec<Vec<u8>> = [1usize, 15, 16, 255, 4096, 70_000]
        .iter()
        .map(|&len| (0..len).map(|i| (i % 251) as u8).collect())
        .collect();

    for payload in &payloads {
        client.writer().write_framed(payload).await?;
    }
    for payload in &payloads {
        assert_eq!(&server.reader().read_framed().await?, payload);
    }
    Ok(())
}

#[tokio::test]
async fn test_zero_length_record_is_empty() -> Result<()> {
    let (mut client, mut server) = pair();

    client.writer().write_framed(&[]).await?;
    client.writer().write_framed(b"next").await?;

    assert!(server.reader().read_framed().await?.is_empty());
    assert_eq!(server.reader().read_framed().await?, b"next");
    Ok(())
}

#[tokio::test]
async fn test_header_is_hex_length_and_crlf() -> Result<()> {
    let (mut client, mut server) = pair();

    client.writer().write_framed(&[7u8; 255]).await?;

    assert_eq!(server.reader().read_exact(4).await?, b"ff\r\n");
    assert_eq!(server.reader().read_exact(255).await?, vec![7u8; 255]);
    Ok(())
}

#[tokio::test]
async fn test_peer_close_mid_header() -> Result<()> {
    let (mut raw, stream) = duplex(64);
    let mut reader = FramedReader::new(stream, IoOptions::default());

    raw.write_all(b"1a").await?;
    drop(raw);

    assert!(matches!(
        reader.read_framed().await,
        Err(TransportError::ClosedByPeer)
    ));
    Ok(())
}

#[tokio::test]
async fn test_peer_close_mid_body() -> Result<()> {
    let (mut raw, stream) = duplex(64);
    let mut reader = FramedReader::new(stream, IoOptions::default());

    raw.write_all(b"10\r\nshort").await?;
    drop(raw);

    assert!(matches!(
        reader.read_framed().await,
        Err(TransportError::ClosedByPeer)
    ));
    Ok(())
}

#[tokio::test]
async fn test_malformed_length_is_rejected() -> Result<()> {
    let (mut raw, stream) = duplex(64);
    let mut reader = FramedReader::new(stream, IoOptions::default());

    raw.write_all(b"zz\r\npayload").await?;

    assert!(matches!(
        reader.read_framed().await,
        Err(TransportError::MalformedLength(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_endless_header_is_rejected() -> Result<()> {
    let (mut raw, stream) = duplex(64);
    let mut reader = FramedReader::new(stream, IoOptions::default());

    raw.write_all(&[b'f'; 40]).await?;

    assert!(matches!(
        reader.read_framed().await,
        Err(TransportError::HeaderTooLong(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_try_read_does_not_block_when_idle() -> Result<()> {
    let (mut client, mut server) = pair();

    assert!(server.reader().try_read_framed().await?.is_none());

    client.writer().write_framed(b"ready").await?;
    let record = server.reader().try_read_framed().await?;
    assert_eq!(record.as_deref(), Some(&b"ready"[..]));

    client.close().await;
    assert!(matches!(
        server.reader().try_read_framed().await,
        Err(TransportError::ClosedByPeer)
    ));
    Ok(())
}

#[tokio::test]
async fn test_stalled_peer_times_out() -> Result<()> {
    let (_raw, stream) = duplex(64);
    let options = IoOptions {
        io_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let mut reader = FramedReader::new(stream, options);

    assert!(matches!(
        reader.read_framed().await,
        Err(TransportError::Timeout(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_write_after_close_fails() -> Result<()> {
    let (stream, _peer) = duplex(64);
    let mut writer = FramedWriter::new(stream, IoOptions::default());

    writer.close().await;
    writer.close().await;
    assert!(writer.is_closed());
    assert!(writer.write_framed(b"late").await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_transient_faults_within_budget_are_retried() -> Result<()> {
    let options = IoOptions {
        max_faults: 3,
        ..Default::default()
    };
    let mut reader = FramedReader::new(FlakyReader::new(2, b"5\r\nhello"), options);

    assert_eq!(reader.read_framed().await?, b"hello");
    Ok(())
}

#[tokio::test]
async fn test_transient_faults_beyond_budget_fail() -> Result<()> {
    let options = IoOptions {
        max_faults: 1,
        ..Default::default()
    };
    let mut reader = FramedReader::new(FlakyReader::new(2, b"5\r\nhello"), options);

    match reader.read_framed().await {
        Err(TransportError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::Interrupted),
        other => panic!("unexpected result: {:?}", other),
    }

    // No budget at all: the first fault is fatal.
    let mut strict = FramedReader::new(FlakyReader::new(1, b"0\r\n"), IoOptions::default());
    assert!(matches!(
        strict.read_framed().await,
        Err(TransportError::Io(_))
    ));
    Ok(())
}
