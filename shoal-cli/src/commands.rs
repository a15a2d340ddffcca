//! CLI command implementations

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Subcommand};
use serde::Serialize;
use shoal_core::ShoalError;
use shoal_core::config::ShoalConfig;
use shoal_core::engine::{EngineStats, spawn_swarm_engine};
use shoal_core::network::HttpConnector;
use shoal_core::range::{IntervalSet, Range};
use shoal_core::stats::SwarmStats;
use shoal_core::storage::FileSystemStorage;
use shoal_core::swarm::{
    CoordinatorEvent, Sha1BlockVerifier, SwarmCoordinator, SwarmFileSystem, SwarmSource,
};
use tokio::sync::broadcast::error::RecvError;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Download files from one or more sources at once
    Download(DownloadArgs),
}

#[derive(Args)]
pub struct DownloadArgs {
    /// Directory the files are written under
    #[arg(short, long)]
    output: PathBuf,

    /// Destination file as PATH:LENGTH, repeated in download order
    #[arg(
        short,
        long = "file",
        value_name = "PATH:LEN",
        required = true,
        value_parser = parse_file_entry
    )]
    files: Vec<(String, u64)>,

    /// Source URL, optionally limited to aggregate bytes with #LOW-HIGH[,LOW-HIGH...]
    #[arg(short, long = "source", value_name = "URL[#LOW-HIGH]")]
    sources: Vec<String>,

    /// Source URL that only serves whole files
    #[arg(long = "no-ranges", value_name = "URL")]
    no_ranges: Vec<String>,

    /// Comma-separated hex SHA-1 digests, one per block
    #[arg(long, value_delimiter = ',', requires = "block_size")]
    sha1_blocks: Vec<String>,

    /// Block size the SHA-1 digests were computed over
    #[arg(long)]
    block_size: Option<u64>,

    /// Give up after this many seconds
    #[arg(long, default_value_t = 3600)]
    timeout: u64,

    /// Print final statistics as JSON
    #[arg(long)]
    json: bool,
}

/// Handle the CLI command
///
/// # Errors
/// Returns appropriate error based on the command that fails
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Download(args) => download(args).await,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Outcome {
    Completed,
    SourcesExhausted,
    TimedOut,
}

#[derive(Serialize)]
struct DownloadReport {
    outcome: Outcome,
    elapsed_secs: f64,
    stats: EngineStats,
}

/// Download files from the given sources
///
/// # Errors
/// - `ShoalError::Swarm` - Invalid file layout or source URL
/// - `ShoalError::Verifier` - Digests do not match the layout
/// - `ShoalError::Connection` - HTTP client could not be created
/// - `ShoalError::Engine` - Engine stopped unexpectedly
/// - Download did not complete before the timeout or ran out of sources
pub async fn download(args: DownloadArgs) -> anyhow::Result<()> {
    if args.sources.is_empty() && args.no_ranges.is_empty() {
        bail!("At least one --source or --no-ranges URL is required");
    }

    let config = ShoalConfig::from_env();
    let files = SwarmFileSystem::new(args.files.clone()).map_err(ShoalError::from)?;
    let total = files.total_size();

    let coordinator = match args.block_size.filter(|_| !args.sha1_blocks.is_empty()) {
        Some(block_size) => {
            let digests = args.sha1_blocks.as_slice();
            let verifier = Sha1BlockVerifier::from_hex(block_size, total, digests)
                .map_err(ShoalError::from)?;
            SwarmCoordinator::with_verifier(files, &config.swarm, Arc::new(verifier))
        }
        None => SwarmCoordinator::new(files, &config.swarm),
    };
    let coordinator = Arc::new(coordinator);
    let mut events = coordinator.subscribe();

    let stats = Arc::new(SwarmStats::new(config.network.bandwidth_window));
    let connector =
        HttpConnector::new(&config.network, stats.bandwidth()).map_err(ShoalError::from)?;
    let connector = Arc::new(connector);
    let storage = Arc::new(FileSystemStorage::new(&args.output, &config.storage));
    let handle = spawn_swarm_engine(config, Arc::clone(&coordinator), storage, connector, stats);

    let mut sources = Vec::new();
    for entry in &args.sources {
        sources.push(parse_source(entry)?);
    }
    for url in &args.no_ranges {
        sources.push(parse_source(url)?.without_range_support());
    }
    for source in sources {
        tracing::info!("Adding source {}", source);
        handle.add_source(source).await.map_err(ShoalError::from)?;
    }

    let started = tokio::time::Instant::now();
    let deadline = started + Duration::from_secs(args.timeout);
    let mut ticker = tokio::time::interval(Duration::from_millis(500));

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(CoordinatorEvent::DownloadCompleted) => break Outcome::Completed,
                Ok(CoordinatorEvent::FileCompleted { path }) => {
                    tracing::info!("Completed {}", path);
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break Outcome::SourcesExhausted,
            },
            _ = ticker.tick() => {
                let stats = handle.stats().await.map_err(ShoalError::from)?;
                if stats.complete {
                    break Outcome::Completed;
                }
                if stats.active_sources == 0 {
                    break Outcome::SourcesExhausted;
                }
                tracing::debug!(
                    "{} of {} bytes verified, {} sources active",
                    stats.leases.verified,
                    total,
                    stats.active_sources
                );
            }
            _ = tokio::time::sleep_until(deadline) => break Outcome::TimedOut,
        }
    };

    let stats = handle.stats().await.map_err(ShoalError::from)?;
    handle.shutdown().await.map_err(ShoalError::from)?;

    let report = DownloadReport {
        outcome,
        elapsed_secs: started.elapsed().as_secs_f64(),
        stats,
    };
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, &args.output);
    }

    match report.outcome {
        Outcome::Completed => Ok(()),
        Outcome::SourcesExhausted => bail!(
            "Download incomplete: no usable sources left with {} bytes missing",
            total - report.stats.leases.verified
        ),
        Outcome::TimedOut => bail!("Download timed out after {} seconds", args.timeout),
    }
}

fn print_report(report: &DownloadReport, output: &std::path::Path) {
    let stats = &report.stats;
    let leases = &stats.leases;
    let percent = if leases.total == 0 {
        100.0
    } else {
        leases.verified as f64 * 100.0 / leases.total as f64
    };

    println!("Download {:?} in {:.1}s", report.outcome, report.elapsed_secs);
    println!("{:-<60}", "");
    println!("  Output:      {}", output.display());
    println!(
        "  Verified:    {} / {} bytes ({percent:.1}%)",
        leases.verified, leases.total
    );
    println!("  Lost:        {} bytes", leases.lost);
    println!("  Sources:     {} added", stats.counters.sources_added);
    println!(
        "  Requests:    {} issued, {} answered",
        stats.counters.requests_issued, stats.counters.responses_processed
    );
    println!(
        "  Received:    {:.2} MB",
        stats.counters.bytes_received as f64 / 1_048_576.0
    );
}

/// Parses a `PATH:LENGTH` file entry.
fn parse_file_entry(value: &str) -> Result<(String, u64), String> {
    let (path, length) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected PATH:LENGTH, got {value:?}"))?;
    let length = length
        .parse::<u64>()
        .map_err(|e| format!("invalid length in {value:?}: {e}"))?;
    Ok((path.to_string(), length))
}

/// Parses `URL[#LOW-HIGH[,LOW-HIGH...]]` into a source.
fn parse_source(entry: &str) -> anyhow::Result<SwarmSource> {
    let (url, ranges) = match entry.rsplit_once('#') {
        Some((url, ranges)) => (url, Some(ranges)),
        None => (entry, None),
    };
    let source = SwarmSource::parse(url).map_err(ShoalError::from)?;

    let Some(ranges) = ranges else {
        return Ok(source);
    };
    let mut available = IntervalSet::new();
    for part in ranges.split(',') {
        let (low, high) = part
            .split_once('-')
            .with_context(|| format!("Invalid byte range {part:?} in {entry}"))?;
        let low = low.trim().parse::<u64>().context("Invalid range start")?;
        let high = high.trim().parse::<u64>().context("Invalid range end")?;
        available.add(Range::try_new(low, high).map_err(ShoalError::from)?);
    }
    Ok(source.with_available(available))
}
