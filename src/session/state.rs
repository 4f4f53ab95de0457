//! Bookkeeping shared by the sending side and the response drain.
//!
//! The coordinator keeps one `StreamState` behind a mutex. The sender
//! appends chunks and counts transmissions; the drain task applies
//! responses. `apply` is pure with respect to I/O so that the flush rules
//! can be exercised without a server.

use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::timing::UtteranceTimer;
use crate::error::SessionError;
use crate::protocol::{AddDataResponse, RESPONSE_OK};

/// One unit of caller audio, or the end-of-input marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioChunk {
    Data(Bytes),
    End,
}

impl AudioChunk {
    pub fn data(&self) -> Option<&Bytes> {
        match self {
            AudioChunk::Data(bytes) => Some(bytes),
            AudioChunk::End => None,
        }
    }

    pub fn is_end(&self) -> bool {
        matches!(self, AudioChunk::End)
    }

    /// Payload size in bytes (zero for the end marker).
    pub fn len(&self) -> usize {
        self.data().map_or(0, Bytes::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Bytes> for AudioChunk {
    fn from(bytes: Bytes) -> Self {
        AudioChunk::Data(bytes)
    }
}

impl From<Vec<u8>> for AudioChunk {
    fn from(bytes: Vec<u8>) -> Self {
        AudioChunk::Data(Bytes::from(bytes))
    }
}

/// A completed utterance handed to the result sink.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub text: String,
    /// Start time in seconds, corrected to be monotonic across the run
    pub start_time: f64,
    /// End time in seconds, corrected to be monotonic across the run
    pub end_time: f64,
    /// Input index of the first chunk in `chunks`
    pub first_chunk: usize,
    /// The chunks this utterance was recognized from, in input order
    pub chunks: Vec<AudioChunk>,
    /// The end-of-utterance response itself
    pub response: AddDataResponse,
}

impl Utterance {
    /// Audio payloads, skipping the end marker.
    pub fn audio(&self) -> impl Iterator<Item = &Bytes> {
        self.chunks.iter().filter_map(AudioChunk::data)
    }

    pub fn audio_len(&self) -> usize {
        self.chunks.iter().map(AudioChunk::len).sum()
    }
}

/// What the drain should do with an applied response.
#[derive(Debug)]
pub enum Dispatch {
    /// Intermediate result; window untouched
    Partial(AddDataResponse),
    /// Completed utterance; its chunks have left the window
    Utterance(Utterance),
    /// End of utterance without candidates; chunks left the window silently
    Dropped { chunks: usize },
}

#[derive(Debug)]
pub struct StreamState {
    /// Sent chunks not yet consumed by a completed utterance
    window: Vec<AudioChunk>,
    /// Chunks sent on the current connection but not yet acknowledged
    pending_answers: usize,
    /// Chunks acknowledged since the last flush
    chunks_answered: usize,
    /// Input index of `window[0]`
    utterance_start_index: usize,
    timer: UtteranceTimer,
    /// The end marker went out on the current connection
    terminal_sent: bool,
    /// Reconnects since the last valid response
    consecutive_failures: u32,
    last_progress: Instant,
    responses: usize,
    utterances: usize,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamState {
    pub fn new() -> Self {
        Self {
            window: Vec::new(),
            pending_answers: 0,
            chunks_answered: 0,
            utterance_start_index: 0,
            timer: UtteranceTimer::new(),
            terminal_sent: false,
            consecutive_failures: 0,
            last_progress: Instant::now(),
            responses: 0,
            utterances: 0,
        }
    }

    /// Remember a chunk before it is transmitted.
    pub fn append(&mut self, chunk: AudioChunk) {
        self.window.push(chunk);
    }

    /// Count a successful transmission.
    pub fn record_sent(&mut self, chunk: &AudioChunk) {
        if self.pending_answers == 0 {
            self.last_progress = Instant::now();
        }
        self.pending_answers += 1;
        if chunk.is_end() {
            self.terminal_sent = true;
        }
    }

    /// Forget per-connection counters before replaying on a new connection.
    pub fn reset_for_reconnect(&mut self) {
        self.pending_answers = 0;
        self.chunks_answered = 0;
        self.terminal_sent = false;
        self.last_progress = Instant::now();
    }

    /// Account for one response from the server.
    pub fn apply(&mut self, response: AddDataResponse) -> Result<Dispatch, SessionError> {
        if response.response_code != RESPONSE_OK {
            return Err(SessionError::Server {
                code: response.response_code,
                message: response.message,
            });
        }

        self.consecutive_failures = 0;
        self.last_progress = Instant::now();
        self.responses += 1;

        let acknowledged = response.acknowledged();
        if acknowledged > self.pending_answers {
            warn!(
                "Server acknowledged {} chunks with only {} pending",
                acknowledged, self.pending_answers
            );
        }
        self.pending_answers = self.pending_answers.saturating_sub(acknowledged);
        self.chunks_answered += acknowledged;

        debug!(
            "got response: endOfUtt={}; len(recognition)={}; merged={}",
            response.is_end_of_utterance(),
            response.recognition.len(),
            acknowledged
        );

        if !response.is_end_of_utterance() {
            return Ok(Dispatch::Partial(response));
        }

        let count = self.chunks_answered.min(self.window.len());
        if count < self.chunks_answered {
            warn!(
                "Utterance covers {} chunks but only {} are unflushed",
                self.chunks_answered,
                self.window.len()
            );
        }
        let first_chunk = self.utterance_start_index;
        let chunks: Vec<AudioChunk> = self.window.drain(..count).collect();
        self.utterance_start_index += count;
        self.chunks_answered = 0;

        let Some(best) = response.best() else {
            info!(
                "Empty utterance for chunks {} to {}, skipping",
                first_chunk,
                first_chunk + count
            );
            return Ok(Dispatch::Dropped { chunks: count });
        };

        let text = best.text().to_string();
        let (raw_start, raw_end) = best.bounds();
        let (start_time, end_time) = self.timer.correct(raw_start, raw_end);

        info!("Chunks from {} to {}:", first_chunk, first_chunk + count);
        self.utterances += 1;

        Ok(Dispatch::Utterance(Utterance {
            text,
            start_time,
            end_time,
            first_chunk,
            chunks,
            response,
        }))
    }

    /// All sent chunks, the end marker included, have been answered.
    pub fn is_drained(&self) -> bool {
        self.terminal_sent && self.pending_answers == 0
    }

    pub fn pending_answers(&self) -> usize {
        self.pending_answers
    }

    pub fn chunks_answered(&self) -> usize {
        self.chunks_answered
    }

    pub fn utterance_start_index(&self) -> usize {
        self.utterance_start_index
    }

    pub fn window(&self) -> &[AudioChunk] {
        &self.window
    }

    pub fn window_snapshot(&self) -> Vec<AudioChunk> {
        self.window.clone()
    }

    /// Concatenated audio of every unflushed chunk.
    pub fn unflushed_audio(&self) -> Vec<u8> {
        self.window
            .iter()
            .filter_map(AudioChunk::data)
            .flat_map(|bytes| bytes.iter().copied())
            .collect()
    }

    pub fn record_failure(&mut self) -> u32 {
        self.consecutive_failures += 1;
        self.consecutive_failures
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Time since the server last answered while answers were pending.
    pub fn silence(&self) -> std::time::Duration {
        if self.pending_answers == 0 {
            std::time::Duration::ZERO
        } else {
            self.last_progress.elapsed()
        }
    }

    pub fn responses(&self) -> usize {
        self.responses
    }

    pub fn utterances(&self) -> usize {
        self.utterances
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AlignInfo, Recognition};

    fn chunk(byte: u8) -> AudioChunk {
        AudioChunk::Data(Bytes::from(vec![byte; 4]))
    }

    fn send(state: &mut StreamState, chunk: AudioChunk) {
        state.append(chunk.clone());
        state.record_sent(&chunk);
    }

    fn response(count: i32, end_of_utt: bool, text: Option<&str>) -> AddDataResponse {
        AddDataResponse {
            response_code: RESPONSE_OK,
            recognition: text
                .map(|t| {
                    vec![Recognition {
                        confidence: 0.9,
                        normalized: Some(t.to_string()),
                        align_info: Some(AlignInfo {
                            start_time: Some(0.0),
                            end_time: Some(1.0),
                            acoustic_score: None,
                        }),
                        words: Vec::new(),
                    }]
                })
                .unwrap_or_default(),
            end_of_utt: Some(end_of_utt),
            messages_count: Some(count),
            message: None,
        }
    }

    #[test]
    fn partial_response_keeps_window() {
        let mut state = StreamState::new();
        send(&mut state, chunk(1));
        send(&mut state, chunk(2));

        let dispatch = state.apply(response(1, false, Some("hel"))).unwrap();
        assert!(matches!(dispatch, Dispatch::Partial(_)));
        assert_eq!(state.window().len(), 2);
        assert_eq!(state.pending_answers(), 1);
        assert_eq!(state.chunks_answered(), 1);
    }

    #[test]
    fn final_response_flushes_answered_prefix() {
        let mut state = StreamState::new();
        for i in 0..4 {
            send(&mut state, chunk(i));
        }

        state.apply(response(2, false, Some("hello"))).unwrap();
        let dispatch = state.apply(response(1, true, Some("hello world"))).unwrap();

        let Dispatch::Utterance(utterance) = dispatch else {
            panic!("expected an utterance");
        };
        assert_eq!(utterance.text, "hello world");
        assert_eq!(utterance.first_chunk, 0);
        assert_eq!(utterance.chunks, vec![chunk(0), chunk(1), chunk(2)]);
        assert_eq!(state.window(), &[chunk(3)]);
        assert_eq!(state.utterance_start_index(), 3);
        assert_eq!(state.chunks_answered(), 0);
        assert_eq!(state.pending_answers(), 1);
    }

    #[test]
    fn batched_acknowledgement_drops_pending_in_one_step() {
        let mut state = StreamState::new();
        for i in 0..5 {
            send(&mut state, chunk(i));
        }
        assert_eq!(state.pending_answers(), 5);

        let dispatch = state.apply(response(5, true, Some("five"))).unwrap();
        assert!(matches!(dispatch, Dispatch::Utterance(_)));
        assert_eq!(state.pending_answers(), 0);
        assert!(state.window().is_empty());
    }

    #[test]
    fn empty_final_response_still_advances_window() {
        let mut state = StreamState::new();
        send(&mut state, chunk(1));
        send(&mut state, chunk(2));

        let dispatch = state.apply(response(2, true, None)).unwrap();
        assert!(matches!(dispatch, Dispatch::Dropped { chunks: 2 }));
        assert!(state.window().is_empty());
        assert_eq!(state.utterance_start_index(), 2);
        assert_eq!(state.utterances(), 0);
    }

    #[test]
    fn error_status_is_rejected_without_touching_counters() {
        let mut state = StreamState::new();
        send(&mut state, chunk(1));

        let mut bad = response(1, true, Some("x"));
        bad.response_code = 500;
        bad.message = Some("overloaded".into());

        match state.apply(bad) {
            Err(SessionError::Server { code, message }) => {
                assert_eq!(code, 500);
                assert_eq!(message.as_deref(), Some("overloaded"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(state.pending_answers(), 1);
        assert_eq!(state.window().len(), 1);
    }

    #[test]
    fn drained_once_end_marker_is_answered() {
        let mut state = StreamState::new();
        send(&mut state, chunk(1));
        send(&mut state, AudioChunk::End);
        assert!(!state.is_drained());

        let dispatch = state.apply(response(2, true, Some("done"))).unwrap();
        let Dispatch::Utterance(utterance) = dispatch else {
            panic!("expected an utterance");
        };
        assert_eq!(utterance.audio().count(), 1);
        assert!(state.is_drained());
    }

    #[test]
    fn reconnect_reset_keeps_window_and_timing() {
        let mut state = StreamState::new();
        send(&mut state, chunk(1));
        send(&mut state, chunk(2));
        state.apply(response(1, false, None)).unwrap();

        state.reset_for_reconnect();
        assert_eq!(state.pending_answers(), 0);
        assert_eq!(state.chunks_answered(), 0);
        assert_eq!(state.window().len(), 2);
        assert_eq!(state.unflushed_audio().len(), 8);
    }

    #[test]
    fn valid_response_resets_reconnect_budget() {
        let mut state = StreamState::new();
        send(&mut state, chunk(1));
        assert_eq!(state.record_failure(), 1);
        assert_eq!(state.record_failure(), 2);

        state.reset_for_reconnect();
        send(&mut state, chunk(1));
        state.apply(response(1, false, None)).unwrap();
        assert_eq!(state.consecutive_failures(), 0);

        let mut bad = response(1, false, None);
        bad.response_code = 500;
        assert!(state.apply(bad).is_err());
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(state.record_failure(), 1);
    }
}
