use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{ChunkOptions, DEFAULT_CHUNK_SIZE};
use crate::session::{
    RecognitionOptions, SessionConfig, StreamingOptions, DEFAULT_HOST, DEFAULT_KEY, DEFAULT_PORT,
};

/// Environment variables override file values, e.g. `ASR_SERVER__API_KEY`.
pub const ENV_PREFIX: &str = "ASR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub recognition: RecognitionOptions,
    pub streaming: StreamingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub api_key: String,
    pub app: String,
    pub service: String,
    pub ipv4_only: bool,
    /// Force TLS on or off; by default port 443 means TLS
    pub tls: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub chunk_size: usize,
    pub start_with_chunk: usize,
    pub max_chunks_count: Option<usize>,
    pub reconnect_delay_secs: f64,
    pub reconnect_retry_count: u32,
    pub pending_limit: usize,
    pub realtime: bool,
    pub poll_interval_ms: u64,
    pub io_timeout_secs: f64,
    pub response_timeout_secs: f64,
    pub max_faults: u32,
    pub recovery_dir: Option<PathBuf>,
    pub verbose: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            api_key: DEFAULT_KEY.to_string(),
            app: session.app,
            service: session.service,
            ipv4_only: false,
            tls: None,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        let streaming = StreamingOptions::default();
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            start_with_chunk: 0,
            max_chunks_count: None,
            reconnect_delay_secs: streaming.reconnect_delay.as_secs_f64(),
            reconnect_retry_count: streaming.reconnect_retry_count,
            pending_limit: streaming.pending_limit,
            realtime: streaming.realtime,
            poll_interval_ms: streaming.poll_interval.as_millis() as u64,
            io_timeout_secs: streaming.io_timeout.as_secs_f64(),
            response_timeout_secs: streaming.response_timeout.as_secs_f64(),
            max_faults: streaming.max_faults,
            recovery_dir: streaming.recovery_dir,
            verbose: streaming.verbose,
        }
    }
}

/// Seconds from configuration; negative or non-finite values mean zero.
fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

impl Config {
    /// Load defaults, then the optional file, then `ASR_*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?;

        settings
            .try_deserialize()
            .context("Failed to parse configuration")
    }

    pub fn session_config(&self) -> SessionConfig {
        let server = &self.server;
        let streaming = &self.streaming;
        SessionConfig {
            host: server.host.clone(),
            port: server.port,
            tls: server.tls,
            ipv4_only: server.ipv4_only,
            api_key: server.api_key.clone(),
            app: server.app.clone(),
            service: server.service.clone(),
            recognition: self.recognition.clone(),
            streaming: StreamingOptions {
                reconnect_delay: secs(streaming.reconnect_delay_secs),
                reconnect_retry_count: streaming.reconnect_retry_count,
                pending_limit: streaming.pending_limit,
                realtime: streaming.realtime,
                poll_interval: Duration::from_millis(streaming.poll_interval_ms.max(1)),
                io_timeout: secs(streaming.io_timeout_secs),
                response_timeout: secs(streaming.response_timeout_secs),
                max_faults: streaming.max_faults,
                recovery_dir: streaming.recovery_dir.clone(),
                verbose: streaming.verbose,
            },
        }
    }

    pub fn chunk_options(&self) -> ChunkOptions {
        ChunkOptions {
            chunk_size: self.streaming.chunk_size,
            start_with_chunk: self.streaming.start_with_chunk,
            max_chunks_count: self.streaming.max_chunks_count,
        }
    }
}
