use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use cloudsweep::config::Config;
use cloudsweep::gcp::accounts::ConfigAccountDirectory;
use cloudsweep::gcp::auth::{AdcCredentialResolver, CredentialResolver, StaticCredentialResolver};
use cloudsweep::gcp::client::Endpoints;
use cloudsweep::gcp::http::GcpHttpClient;
use cloudsweep::metrics::Period;
use cloudsweep::pipeline::{DiscoveryRequest, Pipeline};
use cloudsweep::store::{MemoryStore, PgResourceStore, ResourceStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Fixed bearer token, bypassing Application Default Credentials
const ENV_ACCESS_TOKEN: &str = "CLOUDSWEEP_ACCESS_TOKEN";

/// Discover GCP resources and their metrics, persist them, print a summary
#[derive(Parser, Debug)]
#[command(name = "cloudsweep", version, about, long_about = None)]
struct Args {
    /// Account (GCP project) to scan
    #[arg(short, long)]
    account: String,

    /// Organization the results are stored under
    #[arg(short, long)]
    organization: String,

    /// Region to scan (repeatable); defaults to the account's configured regions
    #[arg(short, long = "region")]
    regions: Vec<String>,

    /// Metric lookback period
    #[arg(short, long, value_enum, default_value = "24h")]
    period: Period,

    /// Keep results in memory instead of writing to the database
    #[arg(long)]
    dry_run: bool,

    /// Repeat every N seconds until interrupted
    #[arg(long)]
    interval: Option<u64>,

    /// Configuration file (defaults to <config_dir>/cloudsweep/config.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database URL, overriding config and environment
    #[arg(long)]
    database_url: Option<String>,

    /// Route every GCP API to one base URL (emulators, local mocks)
    #[arg(long)]
    endpoint: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Failed to open log file {}: {}", log_path.display(), err);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudsweep {} started with log level: {:?}", cloudsweep::VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("cloudsweep").join("cloudsweep.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cloudsweep").join("cloudsweep.log");
    }
    PathBuf::from("cloudsweep.log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(url) = &args.database_url {
        config.database_url = Some(url.clone());
    }
    if let Some(base) = &args.endpoint {
        config.endpoints = Endpoints::single(base);
        config.endpoints.validate()?;
    }

    let pipeline = build_pipeline(&config, args.dry_run).await?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    let mut request = DiscoveryRequest::new(args.account.clone()).with_period(args.period);
    if !args.regions.is_empty() {
        request = request.with_regions(args.regions.clone());
    }

    let Some(interval) = args.interval else {
        return run_once(&pipeline, &args.organization, &request, &cancel).await;
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(err) = run_once(&pipeline, &args.organization, &request, &cancel).await {
                    eprintln!("Error: {err:#}");
                }
            }
        }
    }

    Ok(())
}

async fn build_pipeline(config: &Config, dry_run: bool) -> Result<Pipeline> {
    let resolver: Arc<dyn CredentialResolver> = match std::env::var(ENV_ACCESS_TOKEN) {
        Ok(token) if !token.trim().is_empty() => {
            tracing::info!("Using static access token from {}", ENV_ACCESS_TOKEN);
            Arc::new(StaticCredentialResolver::new(token.trim()))
        }
        _ => Arc::new(
            AdcCredentialResolver::new()
                .await
                .context("Failed to initialize Application Default Credentials")?,
        ),
    };

    let store: Arc<dyn ResourceStore> = match (&config.database_url, dry_run) {
        (Some(url), false) => Arc::new(PgResourceStore::connect(url, &config.pool()).await?),
        _ => {
            tracing::info!("No database configured or dry run, keeping results in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let directory = Arc::new(ConfigAccountDirectory::new(config.accounts.clone()));
    let http = GcpHttpClient::new(config.http_timeout())?;

    Ok(Pipeline::new(
        resolver,
        directory,
        store,
        http,
        Arc::new(config.endpoints.clone()),
        config.pipeline_settings(),
    ))
}

async fn run_once(
    pipeline: &Pipeline,
    organization_id: &str,
    request: &DiscoveryRequest,
    cancel: &CancellationToken,
) -> Result<()> {
    let response = pipeline.run(organization_id, request, cancel).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
