use clap::Parser;
use hackmd_sensor::{IngestionPipeline, Scheduler, SensorConfig};
use interfaces::LogSink;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Polls HackMD for new or changed notes and emits one knowledge event per change.
///
/// Unset options fall back to the defaults in `SensorConfig`.
#[derive(Parser, Debug)]
#[command(name = "hackmd-sensor", version)]
struct Cli {
    /// HackMD API token
    #[arg(long, env = "HACKMD_API_TOKEN", hide_env_values = true)]
    api_token: Option<String>,

    #[arg(long, env = "HACKMD_API_BASE_URL")]
    api_base_url: Option<String>,

    /// Team path to poll
    #[arg(long, env = "HACKMD_WORKSPACE_ID")]
    workspace_id: Option<String>,

    /// Comma-separated note ids; overrides --workspace-id
    #[arg(long, env = "HACKMD_NOTE_IDS", value_delimiter = ',')]
    note_ids: Vec<String>,

    #[arg(long, env = "HACKMD_POLL_INTERVAL_SECONDS")]
    poll_interval_seconds: Option<u64>,

    #[arg(long, env = "HACKMD_MAX_NOTES_PER_POLL")]
    max_notes_per_poll: Option<usize>,

    #[arg(long, env = "HACKMD_STATE_PATH")]
    state_path: Option<PathBuf>,

    #[arg(long, env = "HACKMD_RETRIES")]
    retries: Option<u32>,

    #[arg(long, env = "HACKMD_BACKOFF_BASE_SECONDS")]
    backoff_base_seconds: Option<f64>,

    #[arg(long, env = "HACKMD_BACKOFF_MAX_SECONDS")]
    backoff_max_seconds: Option<f64>,

    #[arg(long, env = "HACKMD_RECOVERY_DELAY_SECONDS")]
    recovery_delay_seconds: Option<u64>,

    #[arg(long, env = "HACKMD_FETCH_CONCURRENCY")]
    fetch_concurrency: Option<usize>,

    /// Skip the contents-hash check against the last emitted bundle
    #[arg(long)]
    no_fingerprint_check: bool,

    /// Run a single poll cycle and exit
    #[arg(long)]
    once: bool,

    /// Used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Cli {
    fn into_config(self) -> SensorConfig {
        let mut config = SensorConfig::new(self.api_token.unwrap_or_default());
        if let Some(url) = self.api_base_url {
            config.api_base_url = url;
        }
        config.workspace_id = self.workspace_id;
        config.note_ids = self.note_ids;
        if let Some(v) = self.poll_interval_seconds {
            config.poll_interval_seconds = v;
        }
        if let Some(v) = self.max_notes_per_poll {
            config.max_notes_per_poll = v;
        }
        if let Some(v) = self.state_path {
            config.state_path = v;
        }
        if let Some(v) = self.retries {
            config.retries = v;
        }
        if let Some(v) = self.backoff_base_seconds {
            config.backoff_base_seconds = v;
        }
        if let Some(v) = self.backoff_max_seconds {
            config.backoff_max_seconds = v;
        }
        if let Some(v) = self.recovery_delay_seconds {
            config.recovery_delay_seconds = v;
        }
        if let Some(v) = self.fetch_concurrency {
            config.fetch_concurrency = v;
        }
        config.fingerprint_cross_check = !self.no_fingerprint_check;
        config
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Cancels `token` on Ctrl-C or SIGTERM.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown requested, stopping after the current cycle");
    token.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let once = cli.once;
    let config = cli.into_config().validate()?;

    info!(
        "Starting HackMD sensor for {} (state file {})",
        config.scope(),
        config.state_path.display()
    );

    let pipeline = Arc::new(IngestionPipeline::from_config(&config, Arc::new(LogSink)).await?);

    if once {
        let report = pipeline.poll_once().await?;
        info!("Single poll finished: {} events emitted", report.emitted());
        return Ok(());
    }

    let scheduler = Arc::new(Scheduler::from_config(pipeline, &config));
    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    let worker = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run(token).await })
    };
    worker.await?;

    let status = scheduler.status().await;
    info!(
        "HackMD sensor stopped, tracking {} notes",
        status.tracked_notes
    );
    Ok(())
}
