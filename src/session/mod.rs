//! Streaming recognition sessions
//!
//! This module provides the `StreamingSession` coordinator that manages:
//! - Connecting and opening a session on the recognition server
//! - Streaming audio chunks with bounded in-flight answers
//! - Draining responses and flushing completed utterances to a sink
//! - Reconnecting and replaying unflushed audio after failures

mod config;
mod coordinator;
mod recovery;
mod sink;
mod state;
mod stats;
mod timing;

pub use config::{
    RecognitionOptions, SessionConfig, StreamingOptions, DEFAULT_FORMAT, DEFAULT_HOST,
    DEFAULT_KEY, DEFAULT_LANG, DEFAULT_PORT, DEFAULT_TOPIC,
};
pub use coordinator::{recognize, recognize_with, SessionPhase, StreamingSession};
pub use recovery::{save_crash_utterance, try_save_crash_utterance};
pub use sink::{FanoutSink, FnSink, ResultSink};
pub use state::{AudioChunk, Dispatch, StreamState, Utterance};
pub use stats::RecognitionStats;
pub use timing::UtteranceTimer;
