use anyhow::{bail, Context, Result};
use asr_stream::{
    read_chunks_from_files, AudioFormat, Config, DetailedSink, FanoutSink, JsonLinesSink,
    ResultSink, SplitterSink, StreamingSession, TextSink,
};
use clap::{Parser, ValueEnum};
use futures::TryStreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputMode {
    /// Utterance text and time span
    Text,
    /// Every response with all candidates and words
    Detailed,
    /// One JSON object per utterance
    Json,
}

/// Recognize speech in audio files with a streaming ASR server.
#[derive(Debug, Parser)]
#[command(name = "asr-stream", version)]
struct Args {
    /// Audio files, streamed in order as one recording
    files: Vec<PathBuf>,

    /// Configuration file (TOML)
    #[arg(long)]
    config: Option<String>,

    /// API key
    #[arg(short, long)]
    key: Option<String>,

    /// Server host
    #[arg(short, long)]
    server: Option<String>,

    /// Server port (443 uses TLS)
    #[arg(short, long)]
    port: Option<u16>,

    /// Input audio format, e.g. audio/x-pcm;bit=16;rate=16000
    #[arg(long)]
    format: Option<String>,

    /// Recognition model (topic)
    #[arg(long)]
    model: Option<String>,

    /// Recognition language
    #[arg(long)]
    lang: Option<String>,

    /// Application name, also sent as User-Agent
    #[arg(long)]
    app: Option<String>,

    /// Bytes per chunk; 65536 is about two seconds of default audio
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Skip this many chunks from the start
    #[arg(long)]
    start_with_chunk: Option<usize>,

    /// Stop after this many chunks
    #[arg(long)]
    max_chunks_count: Option<usize>,

    /// Seconds to wait before reconnecting
    #[arg(long)]
    reconnect_delay: Option<f64>,

    /// Consecutive reconnects before giving up
    #[arg(long)]
    reconnect_retry_count: Option<u32>,

    /// Chunks in flight without an answer
    #[arg(long)]
    pending_limit: Option<usize>,

    /// Silence between utterances, in 10 ms units
    #[arg(long)]
    inter_utt_silence: Option<i32>,

    #[arg(long)]
    cmn_latency: Option<i32>,

    /// Start each utterance with a capital letter
    #[arg(long)]
    capitalize: bool,

    /// How many digits the answer should contain
    #[arg(long)]
    expected_num_count: Option<i32>,

    #[arg(long)]
    biometry: Option<String>,

    /// Disable punctuation
    #[arg(long)]
    nopunctuation: bool,

    /// Client uuid (random by default)
    #[arg(long)]
    uuid: Option<String>,

    /// Resolve IPv4 addresses only
    #[arg(long)]
    ipv4: bool,

    /// Send audio no faster than it plays
    #[arg(long)]
    realtime: bool,

    /// Only log warnings and errors
    #[arg(long)]
    silent: bool,

    /// Result format
    #[arg(long, value_enum, default_value = "text")]
    output: OutputMode,

    /// Also save each utterance's audio and text into this directory
    #[arg(long)]
    split_dir: Option<PathBuf>,
}

impl Args {
    /// Apply command-line flags on top of the loaded configuration.
    fn apply(&self, config: &mut Config) {
        let server = &mut config.server;
        if let Some(key) = &self.key {
            server.api_key = key.clone();
        }
        if let Some(host) = &self.server {
            server.host = host.clone();
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if let Some(app) = &self.app {
            server.app = app.clone();
        }
        server.ipv4_only |= self.ipv4;

        let recognition = &mut config.recognition;
        if let Some(format) = &self.format {
            recognition.format = format.clone();
        }
        if let Some(model) = &self.model {
            recognition.topic = model.clone();
        }
        if let Some(lang) = &self.lang {
            recognition.lang = lang.clone();
        }
        if let Some(value) = self.inter_utt_silence {
            recognition.inter_utt_silence = value;
        }
        if let Some(value) = self.cmn_latency {
            recognition.cmn_latency = value;
        }
        if let Some(value) = self.expected_num_count {
            recognition.expected_num_count = value;
        }
        if self.biometry.is_some() {
            recognition.biometry = self.biometry.clone();
        }
        if self.uuid.is_some() {
            recognition.uuid = self.uuid.clone();
        }
        recognition.capitalize |= self.capitalize;
        if self.nopunctuation {
            recognition.punctuation = false;
        }

        let streaming = &mut config.streaming;
        if let Some(size) = self.chunk_size {
            streaming.chunk_size = size;
        }
        if let Some(start) = self.start_with_chunk {
            streaming.start_with_chunk = start;
        }
        if self.max_chunks_count.is_some() {
            streaming.max_chunks_count = self.max_chunks_count;
        }
        if let Some(delay) = self.reconnect_delay {
            streaming.reconnect_delay_secs = delay;
        }
        if let Some(count) = self.reconnect_retry_count {
            streaming.reconnect_retry_count = count;
        }
        if let Some(limit) = self.pending_limit {
            streaming.pending_limit = limit;
        }
        streaming.realtime |= self.realtime;
    }

    fn sink(&self, config: &Config, prefix: &str) -> Result<Arc<dyn ResultSink>> {
        let printer: Box<dyn ResultSink> = match self.output {
            OutputMode::Text => Box::new(TextSink::stdout()),
            OutputMode::Detailed => Box::new(DetailedSink::stdout()),
            OutputMode::Json => Box::new(JsonLinesSink::stdout()),
        };

        let Some(dir) = &self.split_dir else {
            return Ok(Arc::from(printer));
        };

        let format = AudioFormat::parse(&config.recognition.format);
        let splitter = SplitterSink::new(dir, prefix, &format)?;
        info!("Saving utterances to {}", splitter.dir().display());
        Ok(Arc::new(FanoutSink::new(vec![printer, Box::new(splitter)])))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.silent { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if args.files.is_empty() {
        bail!("Please, specify one or more input filename.");
    }

    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    let mut session_config = config.session_config();
    let uuid = session_config
        .recognition
        .uuid
        .get_or_insert_with(|| uuid::Uuid::new_v4().simple().to_string())
        .clone();

    let sink = args.sink(&config, &uuid)?;

    info!("asr-stream v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Server {}:{}, topic {}, lang {}",
        session_config.host,
        session_config.port,
        session_config.recognition.topic,
        session_config.recognition.lang
    );

    let chunks = read_chunks_from_files(args.files.clone(), config.chunk_options());
    futures::pin_mut!(chunks);

    let mut session = StreamingSession::new(session_config, sink);
    session.connect().await.context("Failed to start recognition")?;

    while let Some(chunk) = chunks.try_next().await? {
        session.send(chunk).await.context("Failed to stream audio")?;
    }

    let stats = session.finish().await.context("Failed to finish recognition")?;
    info!(
        "Recognized {} utterances from {} chunks ({} bytes, {} reconnects)",
        stats.utterances, stats.chunks_sent, stats.bytes_sent, stats.reconnects
    );

    Ok(())
}
