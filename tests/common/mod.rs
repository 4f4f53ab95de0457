// Scripted in-memory recognition server for integration tests.
//
// Each connection handed out by `ScriptedConnector` is backed by a
// `tokio::io::duplex` pipe whose far end is driven by a test-supplied
// script running on its own task.

#![allow(dead_code)]

use anyhow::{bail, Result};
use asr_stream::error::TransportError;
use asr_stream::protocol::{
    AddData, AddDataResponse, AlignInfo, ConnectionRequest, ConnectionResponse, Recognition,
    RESPONSE_OK,
};
use asr_stream::session::{ResultSink, SessionConfig, Utterance};
use asr_stream::transport::{BoxedStream, Connector, FramedTransport, IoOptions};
use bytes::Bytes;
use futures::future::BoxFuture;
use prost::Message;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::DuplexStream;

pub type Script = Box<dyn FnOnce(FakeServer) -> BoxFuture<'static, Result<()>> + Send>;

/// What the next connection attempt does.
pub enum Step {
    Refuse,
    Serve(Script),
}

/// Builds a `Step::Serve` from an async closure.
pub fn serve<F, Fut>(script: F) -> Step
where
    F: FnOnce(FakeServer) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    Step::Serve(Box::new(move |server| -> BoxFuture<'static, Result<()>> {
        Box::pin(script(server))
    }))
}

/// Hands out scripted connections in order; refuses once the script runs out.
pub struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<BoxedStream, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Serve(script)) => {
                let (client, server) = tokio::io::duplex(1 << 20);
                tokio::spawn(async move {
                    if let Err(e) = script(FakeServer::new(server)).await {
                        eprintln!("fake server script failed: {:#}", e);
                    }
                });
                Ok(Box::new(client))
            }
            Some(Step::Refuse) | None => Err(TransportError::Connect {
                addr: self.describe(),
                attempts: 1,
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            }),
        }
    }

    fn describe(&self) -> String {
        "scripted:0".to_string()
    }
}

/// Server end of one fake connection.
pub struct FakeServer {
    transport: FramedTransport<DuplexStream>,
}

impl FakeServer {
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            transport: FramedTransport::new(stream, IoOptions::default()),
        }
    }

    /// Read the HTTP upgrade request and accept it.
    pub async fn accept_upgrade(&mut self) -> Result<String> {
        let mut request = Vec::new();
        while !request.ends_with(b"\r\n\r\n") {
            request.extend(self.transport.reader().read_exact(1).await?);
        }
        self.transport
            .writer()
            .write_raw(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: dictation\r\n\r\n")
            .await?;
        Ok(String::from_utf8(request)?)
    }

    /// Accept the upgrade and the session-open request.
    pub async fn open(&mut self, session_id: &str) -> Result<ConnectionRequest> {
        self.accept_upgrade().await?;
        let request: ConnectionRequest = self.read().await?;
        self.write(&ConnectionResponse {
            response_code: RESPONSE_OK,
            session_id: session_id.to_string(),
            message: None,
        })
        .await?;
        Ok(request)
    }

    pub async fn read<M: Message + Default>(&mut self) -> Result<M> {
        let payload = self.transport.reader().read_framed().await?;
        Ok(M::decode(payload.as_slice())?)
    }

    pub async fn write<M: Message>(&mut self, message: &M) -> Result<()> {
        self.transport
            .writer()
            .write_framed(&message.encode_to_vec())
            .await?;
        Ok(())
    }

    pub async fn next_chunk(&mut self) -> Result<AddData> {
        self.read().await
    }

    /// Next record, or `None` if none arrives within `wait`.
    pub async fn next_chunk_within(&mut self, wait: Duration) -> Result<Option<AddData>> {
        match tokio::time::timeout(wait, self.transport.reader().read_framed()).await {
            Err(_) => Ok(None),
            Ok(payload) => Ok(Some(AddData::decode(payload?.as_slice())?)),
        }
    }

    /// Read records up to and including the end marker.
    pub async fn chunks_until_last(&mut self) -> Result<Vec<AddData>> {
        let mut chunks = Vec::new();
        loop {
            let chunk = self.next_chunk().await?;
            let last = chunk.last_chunk;
            chunks.push(chunk);
            if last {
                return Ok(chunks);
            }
        }
    }

    pub async fn partial(&mut self, count: i32) -> Result<()> {
        self.write(&response(count, false, Some(("...", 0.0, 0.0)))).await
    }

    pub async fn utterance(&mut self, count: i32, text: &str, start: f32, end: f32) -> Result<()> {
        self.write(&response(count, true, Some((text, start, end)))).await
    }

    pub async fn empty_utterance(&mut self, count: i32) -> Result<()> {
        self.write(&response(count, true, None)).await
    }

    pub async fn expect_data(&mut self) -> Result<Bytes> {
        let chunk = self.next_chunk().await?;
        match chunk.audio_data {
            Some(data) if !chunk.last_chunk => Ok(data),
            _ => bail!("expected audio, got end marker"),
        }
    }
}

pub fn response(count: i32, end_of_utt: bool, best: Option<(&str, f32, f32)>) -> AddDataResponse {
    AddDataResponse {
        response_code: RESPONSE_OK,
        recognition: best
            .map(|(text, start, end)| {
                vec![Recognition {
                    confidence: 0.9,
                    words: Vec::new(),
                    normalized: Some(text.to_string()),
                    align_info: Some(AlignInfo {
                        start_time: Some(start),
                        end_time: Some(end),
                        acoustic_score: None,
                    }),
                }]
            })
            .unwrap_or_default(),
        end_of_utt: Some(end_of_utt),
        messages_count: Some(count),
        message: None,
    }
}

/// Records every delivered utterance.
#[derive(Default)]
pub struct CollectingSink {
    utterances: Mutex<Vec<Utterance>>,
    partials: AtomicUsize,
}

impl CollectingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn utterances(&self) -> Vec<Utterance> {
        self.utterances.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.utterances().into_iter().map(|u| u.text).collect()
    }

    pub fn partials(&self) -> usize {
        self.partials.load(Ordering::SeqCst)
    }

    /// Wait until at least `n` utterances have arrived.
    pub async fn wait_for(&self, n: usize) -> Result<()> {
        for _ in 0..500 {
            if self.utterances.lock().unwrap().len() >= n {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        bail!("timed out waiting for {} utterances", n)
    }
}

impl ResultSink for CollectingSink {
    fn on_partial(&self, _response: &AddDataResponse) -> Result<()> {
        self.partials.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn on_utterance(&self, utterance: &Utterance) -> Result<()> {
        self.utterances.lock().unwrap().push(utterance.clone());
        Ok(())
    }
}

/// Session settings tuned for fast tests.
pub fn test_config(recovery_dir: Option<&Path>) -> SessionConfig {
    let mut config = SessionConfig::default();
    config.recognition.uuid = Some("0123456789abcdef0123456789abcdef".to_string());
    config.streaming.reconnect_delay = Duration::from_millis(10);
    config.streaming.poll_interval = Duration::from_millis(2);
    config.streaming.io_timeout = Duration::from_secs(2);
    config.streaming.response_timeout = Duration::from_secs(5);
    config.streaming.recovery_dir = recovery_dir.map(Path::to_path_buf);
    config
}

/// Distinct, recognisable audio chunks.
pub fn chunks(n: u8) -> Vec<Bytes> {
    (0..n).map(|i| Bytes::from(vec![i; 16])).collect()
}
