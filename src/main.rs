//! Dalivim authorship engine CLI
//!
//! Scores how likely a coding submission is the student's own real-time work.

use anyhow::Context;
use clap::{Parser, Subcommand};
use dalivim_authorship::{
    config::Config,
    core::{SessionKey, Signal, SuspicionBand},
    events::{parse_report_log, TelemetryReport},
    service::IngestionService,
    store::{FileResultStore, MemoryResultStore, ResultStore},
    transparency::{create_shared_log, PersistedStats},
    VERSION,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "client")]
use dalivim_authorship::client::{BlockingReportClient, ClientConfig};

#[derive(Parser)]
#[command(name = "dalivim-authorship")]
#[command(version = VERSION)]
#[command(about = "Behavioral telemetry aggregation and authorship scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the telemetry ingestion server
    Serve {
        /// Address to bind (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Keep results in memory only
        #[arg(long)]
        memory: bool,
    },

    /// Score a recorded session offline
    Score {
        /// Reports as a JSON array or one JSON report per line
        reports: PathBuf,
    },

    /// Post a recorded session to a running server
    Replay {
        /// Reports as a JSON array or one JSON report per line
        reports: PathBuf,

        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,

        /// Delivery attempts per report
        #[arg(long, default_value = "3")]
        attempts: u32,
    },

    /// Show the stored result of a submission
    Result {
        #[arg(long)]
        activity: u64,

        #[arg(long)]
        student: u64,
    },

    /// Show cumulative ingestion statistics
    Stats,

    /// Show the suspicion band breakpoints and signals
    Bands,

    /// Show configuration
    Config {
        /// Write the current configuration to the config file
        #[arg(long)]
        init: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let outcome = match cli.command {
        Commands::Serve { host, port, memory } => cmd_serve(host, port, memory),
        Commands::Score { reports } => cmd_score(&reports),
        Commands::Replay {
            reports,
            url,
            attempts,
        } => cmd_replay(&reports, &url, attempts),
        Commands::Result { activity, student } => cmd_result(SessionKey::new(activity, student)),
        Commands::Stats => cmd_stats(),
        Commands::Bands => {
            cmd_bands();
            Ok(())
        }
        Commands::Config { init } => cmd_config(init),
    };

    if let Err(e) = outcome {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,dalivim_authorship=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config() -> anyhow::Result<Config> {
    Config::load().context("Could not load configuration")
}

#[cfg(feature = "server")]
fn cmd_serve(host: Option<String>, port: Option<u16>, memory: bool) -> anyhow::Result<()> {
    let mut config = load_config()?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if memory {
        config.persist_results = false;
    }

    println!("Dalivim Authorship Engine v{VERSION}");
    let results = if config.persist_results {
        config.results_path().display().to_string()
    } else {
        "in memory".to_string()
    };
    println!("  Results: {results}");
    println!(
        "  Idle session timeout: {}s",
        config.session_idle_timeout.as_secs()
    );
    println!("Press Ctrl+C to stop");
    println!();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let server = dalivim_authorship::server::run(config).await?;
        tokio::signal::ctrl_c()
            .await
            .context("Could not listen for Ctrl+C")?;
        println!();
        println!("Stopping server...");
        server.shutdown().await;
        Ok(())
    })
}

#[cfg(not(feature = "server"))]
fn cmd_serve(_host: Option<String>, _port: Option<u16>, _memory: bool) -> anyhow::Result<()> {
    anyhow::bail!("serve requires the `server` feature")
}

fn read_reports(path: &Path) -> anyhow::Result<Vec<TelemetryReport>> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Could not read {path:?}"))?;
    parse_report_log(&content).with_context(|| format!("Could not parse reports in {path:?}"))
}

fn cmd_score(path: &Path) -> anyhow::Result<()> {
    let config = load_config()?;
    let reports = read_reports(path)?;
    let keys: BTreeSet<SessionKey> = reports.iter().map(TelemetryReport::key).collect();

    let store = Arc::new(MemoryResultStore::new());
    let service = IngestionService::from_config(&config, store, create_shared_log());
    for report in reports {
        service.ingest(report)?;
    }

    let mut records = Vec::with_capacity(keys.len());
    for key in keys {
        if let Some(record) = service.submission_result(key)? {
            records.push(record);
        }
    }

    let json = if records.len() == 1 {
        serde_json::to_string_pretty(&records[0])?
    } else {
        serde_json::to_string_pretty(&records)?
    };
    println!("{json}");
    Ok(())
}

#[cfg(feature = "client")]
fn cmd_replay(path: &Path, url: &str, attempts: u32) -> anyhow::Result<()> {
    let reports = read_reports(path)?;
    let client = BlockingReportClient::new(ClientConfig::new(url))?;

    let health = client
        .health()
        .with_context(|| format!("Server at {url} is not reachable"))?;
    println!("Connected to {url} (v{})", health.version);

    for (i, report) in reports.iter().enumerate() {
        let result = client.send_report_with_retry(report, attempts.max(1))?;
        let signals: Vec<&str> = result.signals.iter().map(Signal::as_str).collect();
        println!(
            "[{:>3}] {} t={} score={:.2} confidence={} signals=[{}]{}",
            i + 1,
            report.key(),
            report.timestamp_ms,
            result.authorship_score,
            result.confidence,
            signals.join(", "),
            if report.is_final { " (final)" } else { "" }
        );
    }

    println!();
    println!("Replayed {} reports", reports.len());
    Ok(())
}

#[cfg(not(feature = "client"))]
fn cmd_replay(_path: &Path, _url: &str, _attempts: u32) -> anyhow::Result<()> {
    anyhow::bail!("replay requires the `client` feature")
}

fn cmd_result(key: SessionKey) -> anyhow::Result<()> {
    let config = load_config()?;
    let store = FileResultStore::open(config.results_path())?;

    match store.get(key)? {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            println!();
            println!(
                "Suspicion: {} (score {:.2}, {} confidence)",
                record.band, record.authorship_score, record.confidence
            );
        }
        None => println!("No result stored for submission {key}"),
    }
    Ok(())
}

fn cmd_stats() -> anyhow::Result<()> {
    let config = load_config()?;
    let path = config.stats_path();

    if !path.exists() {
        println!("No ingestion statistics found at {path:?}");
        println!("Run 'dalivim-authorship serve' to start ingesting telemetry.");
        return Ok(());
    }

    let stats = PersistedStats::read(&path)?;
    println!("Cumulative Ingestion Statistics");
    println!("===============================");
    println!("  Reports received: {}", stats.reports_received);
    println!("  Late reports ignored: {}", stats.late_reports);
    println!("  Events accepted: {}", stats.events_accepted);
    println!("  Duplicate events: {}", stats.events_duplicate);
    println!("  Malformed events: {}", stats.events_malformed);
    println!("  Events over capacity: {}", stats.events_over_capacity);
    println!(
        "  Sessions created / finalized / evicted: {} / {} / {}",
        stats.sessions_created, stats.sessions_finalized, stats.sessions_evicted
    );
    println!("  Results written: {}", stats.results_written);
    println!("  Last updated: {}", stats.last_updated);
    Ok(())
}

fn cmd_bands() {
    println!("Suspicion bands (authorship score):");
    for (bound, band) in SuspicionBand::BREAKPOINTS {
        println!("  > {bound:.1}  {band}");
    }
    println!("  else   {}", SuspicionBand::VeryHigh);
    println!();
    println!("Signals:");
    for signal in Signal::ALL {
        println!("  {:<22} {}", signal.as_str(), signal.description());
    }
}

fn cmd_config(init: bool) -> anyhow::Result<()> {
    let config = load_config()?;

    if init {
        let path = config.save()?;
        println!("Wrote configuration to {path:?}");
        return Ok(());
    }

    println!("Configuration file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
