use anyhow::{Context, Result};
use asr_loadtest::telemetry::report;
use asr_loadtest::{
    event_channel, http, AppState, AudioEncoding, AudioSource, Config, ConnectionMode, CredentialCache,
    EventDispatcher, FailureLog, NatsTransport, SessionContext, SimulatedTransport, SimulationProfile,
    StaticCredential, TelemetryAggregator, Transport, TransportKind, WorkerPool,
};
use chrono::{DateTime, Utc};
use clap::Parser;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Concurrent load driver for a streaming speech-recognition service
#[derive(Parser, Debug)]
#[command(name = "asr-loadtest", version)]
struct Cli {
    /// Settings file (TOML, YAML or JSON)
    #[arg(long)]
    config: Option<String>,

    /// Sessions running in parallel
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// Access token sent with every request
    #[arg(long)]
    token: Option<String>,

    /// Token expiry (RFC 3339)
    #[arg(long)]
    token_expires_at: Option<DateTime<Utc>>,

    #[arg(long, value_enum)]
    connection_mode: Option<ConnectionMode>,

    /// Audio source; repeat to spread workers over several files
    #[arg(long = "audio-file")]
    audio_files: Vec<String>,

    #[arg(long, value_enum)]
    encoding: Option<AudioEncoding>,

    /// 8000 or 16000
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Bytes per send call
    #[arg(long)]
    frame_bytes: Option<usize>,

    #[arg(long)]
    compression_ratio: Option<u32>,

    /// End-of-sentence silence in ms (200-2000)
    #[arg(long)]
    max_sentence_silence: Option<u32>,

    /// Send as fast as possible
    #[arg(long)]
    no_pacing: bool,

    /// Iterations per worker (0 runs for --duration)
    #[arg(long)]
    loop_count: Option<u32>,

    /// Run length in seconds
    #[arg(long)]
    duration: Option<u64>,

    #[arg(long, value_enum)]
    transport: Option<TransportKind>,

    #[arg(long)]
    nats_url: Option<String>,

    #[arg(long)]
    failure_log: Option<String>,

    /// Serve the status API on this port
    #[arg(long)]
    http_port: Option<u16>,

    /// Print the telemetry snapshot as JSON
    #[arg(long)]
    json: bool,

    /// Used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    /// Command-line values take precedence over file and environment
    fn apply(&self, config: &mut Config) {
        if let Some(concurrency) = self.concurrency {
            config.run.concurrency = concurrency;
        }
        if let Some(token) = &self.token {
            config.transport.token = Some(token.clone());
        }
        if self.token_expires_at.is_some() {
            config.transport.token_expires_at = self.token_expires_at;
        }
        if let Some(mode) = self.connection_mode {
            config.run.connection_mode = mode;
        }
        if !self.audio_files.is_empty() {
            config.audio.files = self.audio_files.clone();
        }
        if let Some(encoding) = self.encoding {
            config.audio.encoding = encoding;
        }
        if let Some(sample_rate) = self.sample_rate {
            config.audio.sample_rate = sample_rate;
        }
        if self.frame_bytes.is_some() {
            config.audio.frame_bytes = self.frame_bytes;
        }
        if let Some(ratio) = self.compression_ratio {
            config.audio.compression_ratio = ratio;
        }
        if self.max_sentence_silence.is_some() {
            config.recognition.max_sentence_silence_ms = self.max_sentence_silence;
        }
        if self.no_pacing {
            config.run.pacing = false;
        }
        if let Some(loop_count) = self.loop_count {
            config.run.loop_count = loop_count;
        }
        if self.duration.is_some() {
            config.run.duration_secs = self.duration;
        }
        if let Some(kind) = self.transport {
            config.transport.kind = kind;
        }
        if let Some(url) = &self.nats_url {
            config.transport.nats_url = url.clone();
        }
        if let Some(path) = &self.failure_log {
            config.run.failure_log = path.clone();
        }
        if self.http_port.is_some() {
            config.http.port = self.http_port;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(-1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config.validate()?;

    info!("asr-loadtest v{}", env!("CARGO_PKG_VERSION"));

    let format = config.audio_format();
    let sources = config
        .audio
        .files
        .iter()
        .map(|path| AudioSource::open(path, format))
        .collect::<Result<Vec<_>>>()?;

    let credentials = Arc::new(CredentialCache::new(Box::new(StaticCredential::new(
        config.transport.token.clone().unwrap_or_default(),
        config.transport.token_expires_at,
    ))));
    credentials.current()?;

    let telemetry = Arc::new(TelemetryAggregator::new());
    let failure_log = Arc::new(FailureLog::new(&config.run.failure_log));
    let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&telemetry), failure_log));

    let (sink, events) = event_channel();
    let transport: Arc<dyn Transport> = match config.transport.kind {
        TransportKind::Nats => Arc::new(NatsTransport::connect(&config.transport.nats_url, sink).await?),
        TransportKind::Simulated => Arc::new(SimulatedTransport::new(SimulationProfile::default(), sink)),
    };
    let dispatch_task = tokio::spawn(Arc::clone(&dispatcher).run(events));

    if let Some(port) = config.http.port {
        let state = AppState::new(Arc::clone(&dispatcher));
        let bind = config.http.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = http::serve(&bind, port, state).await {
                error!("{:#}", e);
            }
        });
    }

    let context = SessionContext {
        transport,
        dispatcher,
        telemetry,
        credentials,
    };
    let pool = WorkerPool::new(config.pool_config(), context, sources);

    let running = pool.shutdown_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, finishing current iterations");
            running.store(false, Ordering::SeqCst);
        }
    });

    let summary = pool.run().await?;
    dispatch_task.abort();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary.snapshot)?);
    } else {
        print!("{}", report::render(&summary.snapshot, summary.elapsed));
    }

    Ok(())
}
