use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::transport::{IoOptions, TcpConnector};

pub const DEFAULT_HOST: &str = "asr.yandex.net";
pub const DEFAULT_PORT: u16 = 80;
pub const DEFAULT_KEY: &str = "paste-your-own-key";
pub const DEFAULT_FORMAT: &str = "audio/x-pcm;bit=16;rate=16000";
pub const DEFAULT_TOPIC: &str = "freeform";
pub const DEFAULT_LANG: &str = "ru-RU";

/// Configuration for a recognition session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Recognition server host
    pub host: String,

    /// Recognition server port (443 implies TLS)
    pub port: u16,

    /// Force TLS on or off regardless of the port
    pub tls: Option<bool>,

    /// Resolve IPv4 addresses only
    pub ipv4_only: bool,

    /// API key issued for the service
    pub api_key: String,

    /// Application name, also sent as the User-Agent
    pub app: String,

    /// Service named in the upgrade request
    pub service: String,

    pub recognition: RecognitionOptions,

    pub streaming: StreamingOptions,
}

/// What the server is asked to recognize and how.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionOptions {
    /// Recognition model, e.g. "freeform" or "freeform8alaw" for phone audio
    pub topic: String,

    /// Recognition language, e.g. "ru-RU"
    pub lang: String,

    /// Audio format string, e.g. "audio/x-pcm;bit=16;rate=16000"
    pub format: String,

    pub punctuation: bool,

    /// Pause between phrases that closes an utterance, in 10 ms units
    pub inter_utt_silence: i32,

    pub cmn_latency: i32,

    /// Start each utterance with a capital letter
    pub capitalize: bool,

    /// Hint for how many digits the answer should contain (0 = no hint)
    pub expected_num_count: i32,

    pub biometry: Option<String>,

    /// Client uuid; random when unset
    pub uuid: Option<String>,
}

/// How audio is streamed and how failures are retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingOptions {
    /// Pause before reconnecting after a failure
    pub reconnect_delay: Duration,

    /// Consecutive reconnects before giving up
    pub reconnect_retry_count: u32,

    /// Chunks allowed in flight without an answer
    pub pending_limit: usize,

    /// Pace sending to the audio's own duration
    pub realtime: bool,

    /// Sleep between empty polls of the response channel
    pub poll_interval: Duration,

    /// Longest a single socket read or write may stall
    pub io_timeout: Duration,

    /// Longest the server may stay silent while answers are pending
    pub response_timeout: Duration,

    /// Consecutive transient socket faults tolerated per operation
    pub max_faults: u32,

    /// Where unflushed audio is saved when the run gives up
    pub recovery_dir: Option<PathBuf>,

    /// Log every frame
    pub verbose: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            tls: None,
            ipv4_only: false,
            api_key: DEFAULT_KEY.to_string(),
            app: "local".to_string(),
            service: "dictation".to_string(),
            recognition: RecognitionOptions::default(),
            streaming: StreamingOptions::default(),
        }
    }
}

impl Default for RecognitionOptions {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            lang: DEFAULT_LANG.to_string(),
            format: DEFAULT_FORMAT.to_string(),
            punctuation: true,
            inter_utt_silence: 120,
            cmn_latency: 50,
            capitalize: false,
            expected_num_count: 0,
            biometry: None,
            uuid: None,
        }
    }
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(500),
            reconnect_retry_count: 5,
            pending_limit: 50,
            realtime: false,
            poll_interval: Duration::from_millis(10),
            io_timeout: Duration::from_secs(8),
            response_timeout: Duration::from_secs(60),
            max_faults: 0,
            recovery_dir: Some(PathBuf::from(".")),
            verbose: false,
        }
    }
}

impl SessionConfig {
    /// TCP/TLS connector for the configured server.
    pub fn connector(&self) -> TcpConnector {
        let connector = TcpConnector::new(self.host.clone(), self.port).ipv4_only(self.ipv4_only);
        match self.tls {
            Some(tls) => connector.tls(tls),
            None => connector,
        }
    }

    pub fn io_options(&self) -> IoOptions {
        IoOptions {
            io_timeout: self.streaming.io_timeout,
            max_faults: self.streaming.max_faults,
            verbose: self.streaming.verbose,
        }
    }
}
