use std::time::Duration;

use thiserror::Error;

/// Socket-level failures raised by the framed transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to {addr} after {attempts} attempts: {source}")]
    Connect {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("No usable address for {0}")]
    NoAddress(String),

    #[error("TLS: {0}")]
    Tls(String),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection closed by peer")]
    ClosedByPeer,

    #[error("Malformed frame length: {0:?}")]
    MalformedLength(String),

    #[error("Frame header exceeds {0} bytes")]
    HeaderTooLong(usize),

    #[error("Frame of {0} bytes exceeds the size limit")]
    FrameTooLarge(usize),

    #[error("Socket stalled for {0:?}")]
    Timeout(Duration),
}

/// Failures of a recognition session. Everything except
/// [`SessionError::RetriesExhausted`] and [`SessionError::Closed`] is retried
/// by reconnecting.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport: {0}")]
    Transport(#[from] TransportError),

    #[error("Unable to upgrade connection: {0:?}")]
    UpgradeRejected(String),

    #[error("Wrong response from server, status_code={code}{}", format_message(.message))]
    Server { code: i32, message: Option<String> },

    #[error("Malformed record: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("No response for {0:?} with answers pending")]
    Stalled(Duration),

    #[error("Drain task aborted: {0}")]
    DrainAborted(String),

    #[error("Session is closed")]
    Closed,

    #[error("Gave up after {attempts} reconnect attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<SessionError>,
    },
}

impl SessionError {
    /// Whether reconnecting and replaying the window may cure this error.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SessionError::RetriesExhausted { .. } | SessionError::Closed
        )
    }
}

fn format_message(message: &Option<String>) -> String {
    match message {
        Some(m) => format!(", message is \"{}\"", m),
        None => String::new(),
    }
}
