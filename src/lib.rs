pub mod audio;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod transport;

pub use audio::{read_chunks_from_files, AudioFormat, ChunkOptions};
pub use config::Config;
pub use error::{SessionError, TransportError};
pub use session::{
    recognize, recognize_with, AudioChunk, FanoutSink, FnSink, RecognitionStats, ResultSink,
    SessionConfig, SessionPhase, StreamingSession, Utterance,
};
pub use sink::{DetailedSink, JsonLinesSink, SplitterSink, TextSink};
pub use transport::{Connector, TcpConnector};
