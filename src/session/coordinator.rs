use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{Stream, StreamExt};
use prost::Message;
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::config::SessionConfig;
use super::recovery::try_save_crash_utterance;
use super::sink::ResultSink;
use super::state::{AudioChunk, Dispatch, StreamState};
use super::stats::RecognitionStats;
use crate::audio::AudioFormat;
use crate::error::{SessionError, TransportError};
use crate::protocol::{handshake, AddData, AddDataResponse};
use crate::transport::{BoxedStream, Connector, FramedReader, FramedTransport, FramedWriter};

type DrainHandle = JoinHandle<Result<(), SessionError>>;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connected,
    Streaming,
    Reconnecting,
    Closed,
}

/// One live connection: the writing half plus the task draining the reading half.
struct Link {
    writer: FramedWriter<WriteHalf<BoxedStream>>,
    drain: Option<DrainHandle>,
    session_id: String,
}

/// Streams audio chunks to the recognition server and delivers utterances
/// to a [`ResultSink`] while the audio keeps flowing.
///
/// The caller drives `send` in input order. Responses are drained by a
/// background task per connection. On any transport or protocol failure the
/// session reconnects and replays every chunk that has not yet been consumed
/// by a completed utterance.
pub struct StreamingSession {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn ResultSink>,
    uuid: String,
    state: Arc<Mutex<StreamState>>,
    progress: Arc<Notify>,
    link: Option<Link>,
    phase: SessionPhase,
    /// The end marker has been accepted from the caller
    finishing: bool,
    bytes_per_second: Option<f64>,
    started: Instant,
    started_at: DateTime<Utc>,
    chunks_sent: usize,
    bytes_sent: usize,
    chunks_resent: usize,
    reconnects: u32,
}

impl StreamingSession {
    /// Create a session that dials the configured server.
    pub fn new(config: SessionConfig, sink: Arc<dyn ResultSink>) -> Self {
        let connector = Arc::new(config.connector());
        Self::with_connector(config, connector, sink)
    }

    /// Create a session over a custom connector.
    pub fn with_connector(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let uuid = config
            .recognition
            .uuid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let bytes_per_second = if config.streaming.realtime {
            match AudioFormat::parse(&config.recognition.format).bytes_per_second() {
                Some(rate) => Some(rate as f64),
                None => {
                    warn!(
                        "Realtime pacing disabled: unknown byte rate for {}",
                        config.recognition.format
                    );
                    None
                }
            }
        } else {
            None
        };

        Self {
            config,
            connector,
            sink,
            uuid,
            state: Arc::new(Mutex::new(StreamState::new())),
            progress: Arc::new(Notify::new()),
            link: None,
            phase: SessionPhase::Idle,
            finishing: false,
            bytes_per_second,
            started: Instant::now(),
            started_at: Utc::now(),
            chunks_sent: 0,
            bytes_sent: 0,
            chunks_resent: 0,
            reconnects: 0,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Server-issued id of the live connection's session, if any.
    pub fn session_id(&self) -> Option<&str> {
        self.link.as_ref().map(|link| link.session_id.as_str())
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub async fn pending_answers(&self) -> usize {
        self.state.lock().await.pending_answers()
    }

    /// Chunks sent but not yet consumed by a completed utterance.
    pub async fn unflushed_chunks(&self) -> usize {
        self.state.lock().await.window().len()
    }

    /// Connect and open the session, retrying within the reconnect budget.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        if self.phase == SessionPhase::Closed {
            return Err(SessionError::Closed);
        }
        if self.link.is_some() {
            return Ok(());
        }

        info!("uuid={}", self.uuid);
        self.started = Instant::now();
        self.started_at = Utc::now();

        if let Err(e) = self.open_link().await {
            self.recover(e).await?;
        }
        info!("Recognition was started.");
        Ok(())
    }

    /// Stream one chunk. `AudioChunk::End` finalizes the input.
    pub async fn send(&mut self, chunk: impl Into<AudioChunk>) -> Result<(), SessionError> {
        let chunk = chunk.into();
        if self.phase == SessionPhase::Closed {
            return Err(SessionError::Closed);
        }
        if self.link.is_none() {
            self.connect().await?;
        }

        match chunk.data() {
            Some(data) => info!(
                "About to send chunk {} ({} bytes)",
                self.chunks_sent,
                data.len()
            ),
            None => info!("No more chunks. Finalizing recognition."),
        }

        self.pace().await;

        self.state.lock().await.append(chunk.clone());
        if chunk.is_end() {
            self.finishing = true;
        } else {
            self.chunks_sent += 1;
            self.bytes_sent += chunk.len();
        }

        if let Err(e) = self.transmit(&chunk).await {
            self.recover(e).await?;
        }
        Ok(())
    }

    /// Send the end marker, wait for every outstanding answer and close.
    pub async fn finish(mut self) -> Result<RecognitionStats, SessionError> {
        self.send(AudioChunk::End).await?;

        loop {
            match self.wait_drained().await {
                Ok(()) => break,
                Err(e) => self.recover(e).await?,
            }
        }

        let leftover = self.unflushed_chunks().await;
        if leftover > 0 {
            warn!("{} chunks were answered without a completed utterance", leftover);
        }

        self.close().await;
        info!("Recognition is done.");

        let stats = self.stats().await;
        info!(
            "Start at {}, finish at {}, took {:.3} seconds",
            stats.started_at.format("[%d.%m.%Y %H:%M:%S]"),
            stats.finished_at.format("[%d.%m.%Y %H:%M:%S]"),
            stats.duration_secs
        );
        info!("Avg. {:.3} chunks per second", stats.chunks_per_second());
        Ok(stats)
    }

    /// Tear the connection down. Calling it again is a no-op.
    pub async fn close(&mut self) {
        self.close_link().await;
        self.phase = SessionPhase::Closed;
    }

    pub async fn stats(&self) -> RecognitionStats {
        let state = self.state.lock().await;
        RecognitionStats {
            uuid: self.uuid.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration_secs: self.started.elapsed().as_secs_f64(),
            chunks_sent: self.chunks_sent,
            bytes_sent: self.bytes_sent,
            chunks_resent: self.chunks_resent,
            responses: state.responses(),
            utterances: state.utterances(),
            reconnects: self.reconnects,
        }
    }

    /// Open a connection, run the handshake and start draining responses.
    async fn open_link(&mut self) -> Result<(), SessionError> {
        let stream = self.connector.connect().await?;
        let mut transport = FramedTransport::new(stream, self.config.io_options());

        let session_id = match handshake(&mut transport, &self.config, &self.uuid).await {
            Ok(id) => id,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };
        debug!("Session opened on {}", self.connector.describe());

        let (reader, writer) = transport.into_split();
        let drain = tokio::spawn(drain_responses(
            reader,
            Arc::clone(&self.state),
            Arc::clone(&self.sink),
            Arc::clone(&self.progress),
            self.config.streaming.poll_interval,
            self.config.streaming.response_timeout,
        ));

        self.link = Some(Link {
            writer,
            drain: Some(drain),
            session_id,
        });
        self.phase = SessionPhase::Connected;
        Ok(())
    }

    async fn close_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.writer.close().await;
            if let Some(drain) = link.drain.take() {
                drain.abort();
                match drain.await {
                    Ok(Err(e)) => debug!("Drain ended with: {}", e),
                    Err(e) if !e.is_cancelled() => warn!("Drain task failed: {}", e),
                    _ => {}
                }
            }
            debug!("Closed session {}", link.session_id);
        }
    }

    /// Reconnect and replay the unflushed window until it succeeds or the
    /// retry budget runs out.
    async fn recover(&mut self, mut failure: SessionError) -> Result<(), SessionError> {
        loop {
            if !failure.is_recoverable() {
                return Err(failure);
            }

            let attempt = self.state.lock().await.record_failure();
            warn!("Connection lost! ({})", failure);

            if attempt > self.config.streaming.reconnect_retry_count {
                return Err(self.give_up(failure).await);
            }

            self.phase = SessionPhase::Reconnecting;
            self.close_link().await;
            self.state.lock().await.reset_for_reconnect();

            let delay = self.config.streaming.reconnect_delay;
            info!(
                "Reconnecting! (attempt {}/{}, sleeping {:?})",
                attempt, self.config.streaming.reconnect_retry_count, delay
            );
            tokio::time::sleep(delay).await;

            if let Err(e) = self.open_link().await {
                failure = e;
                continue;
            }
            self.reconnects += 1;

            match self.replay().await {
                Ok(()) => return Ok(()),
                Err(e) => failure = e,
            }
        }
    }

    async fn give_up(&mut self, failure: SessionError) -> SessionError {
        let attempts = self.config.streaming.reconnect_retry_count;
        error!("Gave up after {} reconnect attempts", attempts);

        self.close().await;
        let audio = self.state.lock().await.unflushed_audio();
        try_save_crash_utterance(self.config.streaming.recovery_dir.as_deref(), &audio);

        SessionError::RetriesExhausted {
            attempts,
            source: Box::new(failure),
        }
    }

    /// Resend every unflushed chunk, oldest first, on the new connection.
    async fn replay(&mut self) -> Result<(), SessionError> {
        let (chunks, first) = {
            let state = self.state.lock().await;
            (state.window_snapshot(), state.utterance_start_index())
        };
        info!(
            "Resending current utterance (chunks {}-{})...",
            first,
            first + chunks.len()
        );

        for chunk in &chunks {
            self.transmit(chunk).await?;
            self.chunks_resent += 1;
        }

        // The end marker itself may already be flushed with the last utterance.
        if self.finishing && !chunks.iter().any(AudioChunk::is_end) {
            self.transmit(&AudioChunk::End).await?;
        }
        Ok(())
    }

    /// Send one record on the live connection, honouring backpressure.
    async fn transmit(&mut self, chunk: &AudioChunk) -> Result<(), SessionError> {
        self.wait_for_capacity().await?;

        let record = match chunk {
            AudioChunk::Data(bytes) => AddData::audio(bytes.clone()),
            AudioChunk::End => AddData::last(),
        };
        let payload = record.encode_to_vec();

        // Count first: the answer may be drained before the write returns.
        self.state.lock().await.record_sent(chunk);

        let link = self.link.as_mut().ok_or_else(not_connected)?;
        link.writer.write_framed(&payload).await?;
        self.phase = SessionPhase::Streaming;
        Ok(())
    }

    /// Block while too many chunks are waiting for an answer.
    async fn wait_for_capacity(&mut self) -> Result<(), SessionError> {
        let limit = self.config.streaming.pending_limit;
        let poll = self.config.streaming.poll_interval;
        let mut logged = false;

        loop {
            self.check_drain()?;

            let pending = self.state.lock().await.pending_answers();
            if pending <= limit {
                return Ok(());
            }
            if !logged {
                debug!("{} answers pending (limit {}), waiting", pending, limit);
                logged = true;
            }

            let _ = tokio::time::timeout(poll, self.progress.notified()).await;
        }
    }

    /// Surface a drain task that stopped with an error.
    fn check_drain(&mut self) -> Result<(), SessionError> {
        let link = self.link.as_mut().ok_or_else(not_connected)?;
        let finished = link.drain.as_ref().map_or(false, JoinHandle::is_finished);
        if !finished {
            return Ok(());
        }

        match link.drain.take().and_then(|drain| futures::FutureExt::now_or_never(drain)) {
            Some(Ok(Err(e))) => Err(e),
            Some(Err(e)) => Err(SessionError::DrainAborted(e.to_string())),
            _ => Ok(()),
        }
    }

    async fn wait_drained(&mut self) -> Result<(), SessionError> {
        let link = self.link.as_mut().ok_or_else(not_connected)?;
        let Some(drain) = link.drain.take() else {
            return Ok(());
        };
        match drain.await {
            Ok(result) => result,
            Err(e) => Err(SessionError::DrainAborted(e.to_string())),
        }
    }

    /// Hold the sender back to the audio's real duration.
    async fn pace(&self) {
        let Some(rate) = self.bytes_per_second else {
            return;
        };
        let due = Duration::from_secs_f64(self.bytes_sent as f64 / rate);
        let elapsed = self.started.elapsed();
        if elapsed < due {
            tokio::time::sleep(due - elapsed).await;
        }
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        // Without this the drain task would keep the socket open.
        if let Some(drain) = self.link.as_mut().and_then(|link| link.drain.take()) {
            drain.abort();
        }
    }
}

fn not_connected() -> SessionError {
    SessionError::Transport(TransportError::Io(std::io::Error::new(
        std::io::ErrorKind::NotConnected,
        "no live connection",
    )))
}

/// Drain responses from one connection until every chunk is answered or
/// the connection fails.
async fn drain_responses(
    mut reader: FramedReader<ReadHalf<BoxedStream>>,
    state: Arc<Mutex<StreamState>>,
    sink: Arc<dyn ResultSink>,
    progress: Arc<Notify>,
    poll_interval: Duration,
    response_timeout: Duration,
) -> Result<(), SessionError> {
    let result = drain_loop(
        &mut reader,
        &state,
        sink.as_ref(),
        &progress,
        poll_interval,
        response_timeout,
    )
    .await;
    progress.notify_waiters();
    result
}

async fn drain_loop(
    reader: &mut FramedReader<ReadHalf<BoxedStream>>,
    state: &Mutex<StreamState>,
    sink: &dyn ResultSink,
    progress: &Notify,
    poll_interval: Duration,
    response_timeout: Duration,
) -> Result<(), SessionError> {
    loop {
        let Some(payload) = reader.try_read_framed().await? else {
            {
                let state = state.lock().await;
                if state.is_drained() {
                    return Ok(());
                }
                let silence = state.silence();
                if silence > response_timeout {
                    return Err(SessionError::Stalled(silence));
                }
            }
            tokio::time::sleep(poll_interval).await;
            continue;
        };

        let response = AddDataResponse::decode(payload.as_slice())?;
        let (dispatch, drained) = {
            let mut state = state.lock().await;
            let dispatch = state.apply(response)?;
            (dispatch, state.is_drained())
        };
        progress.notify_waiters();

        deliver(sink, dispatch);

        if drained {
            return Ok(());
        }
    }
}

/// Hand a dispatch to the sink, containing any failure inside it.
fn deliver(sink: &dyn ResultSink, dispatch: Dispatch) {
    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| match &dispatch {
        Dispatch::Partial(response) => {
            debug!("utterance incomplete, hiding partial result");
            sink.on_partial(response)
        }
        Dispatch::Utterance(utterance) => sink.on_utterance(utterance),
        Dispatch::Dropped { .. } => Ok(()),
    }));

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Result sink failed: {:#}", e),
        Err(_) => error!("Result sink panicked"),
    }
}

/// Stream every chunk of `chunks` through a new session and finalize it.
pub async fn recognize<S>(
    chunks: S,
    config: SessionConfig,
    sink: Arc<dyn ResultSink>,
) -> Result<RecognitionStats, SessionError>
where
    S: Stream<Item = Bytes>,
{
    let mut session = StreamingSession::new(config, sink);
    run(&mut session, chunks).await?;
    session.finish().await
}

/// Like [`recognize`], over a custom connector.
pub async fn recognize_with<S>(
    chunks: S,
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn ResultSink>,
) -> Result<RecognitionStats, SessionError>
where
    S: Stream<Item = Bytes>,
{
    let mut session = StreamingSession::with_connector(config, connector, sink);
    run(&mut session, chunks).await?;
    session.finish().await
}

async fn run<S>(session: &mut StreamingSession, chunks: S) -> Result<(), SessionError>
where
    S: Stream<Item = Bytes>,
{
    session.connect().await?;
    futures::pin_mut!(chunks);
    while let Some(chunk) = chunks.next().await {
        session.send(chunk).await?;
    }
    Ok(())
}
