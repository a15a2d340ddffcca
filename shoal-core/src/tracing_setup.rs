//! Tracing setup for Shoal
//!
//! The console follows the level the user picked. The trace file keeps
//! every lease transition and request made by the swarm, with the HTTP
//! stack held back so it does not drown them out.

use std::fs::{File, create_dir_all};
use std::path::Path;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// Name of the per-run trace file inside the logs directory.
pub const TRACE_FILE_NAME: &str = "shoal-last-run.log";

/// Environment variable overriding the trace file filter.
pub const TRACE_FILTER_ENV: &str = "SHOAL_TRACE";

/// Targets of the HTTP client and test server stacks.
const TRANSPORT_TARGETS: &[&str] = &["hyper", "hyper_util", "h2", "reqwest", "rustls", "axum"];

/// Targets emitting per-lease bookkeeping at trace level.
const LEASE_TARGETS: &[&str] = &[
    "shoal_core::swarm::coordinator",
    "shoal_core::swarm::listener",
    "shoal_core::swarm::downloader",
];

/// Console filter directives for `level`.
///
/// Shoal crates log at `level`; the transport stack only reports warnings.
/// Lease bookkeeping is capped at debug unless trace was asked for.
pub fn console_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec![
        "warn".to_string(),
        format!("shoal_core={level}"),
        format!("shoal_sim={level}"),
        format!("shoal_cli={level}"),
    ];
    if level != "trace" {
        directives.extend(LEASE_TARGETS.iter().map(|target| format!("{target}=debug")));
    }
    directives.extend(TRANSPORT_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}

/// Trace file filter directives.
///
/// Full trace for the swarm, debug for the rest of Shoal, info for the
/// transport stack.
pub fn file_directives() -> String {
    let mut directives = vec![
        "info".to_string(),
        "shoal_core=debug".to_string(),
        "shoal_core::swarm=trace".to_string(),
        "shoal_sim=trace".to_string(),
        "shoal_cli=debug".to_string(),
    ];
    directives.extend(TRANSPORT_TARGETS.iter().map(|target| format!("{target}=info")));
    directives.join(",")
}

/// Initialize tracing with dual output: console (user level) + file (swarm trace)
///
/// # Arguments
/// * `console_level` - Log level for Shoal's console output
/// * `logs_dir` - Directory to write trace logs (defaults to "./logs")
///
/// # File Output
/// Writes lease and request traces to `logs/shoal-last-run.log`, overwriting the
/// previous run. `SHOAL_TRACE` replaces the file filter when set.
///
/// # Errors
///
/// - `Box<dyn std::error::Error>` - If logs directory cannot be created or log file cannot be opened for writing
pub fn init_tracing(
    console_level: Level,
    logs_dir: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let logs_path = logs_dir.unwrap_or_else(|| Path::new("logs"));
    create_dir_all(logs_path)?;

    let log_file_path = logs_path.join(TRACE_FILE_NAME);
    let log_file = File::create(&log_file_path)?;

    // RUST_LOG wins over the CLI level when set
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_directives(console_level)));
    let file_filter = EnvFilter::try_from_env(TRACE_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(file_directives()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_writer(log_file)
        .with_filter(file_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!(
        "Tracing initialized: console={}, swarm_trace={}",
        console_level,
        log_file_path.display()
    );

    Ok(())
}

/// CLI log levels for user control
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CliLogLevel {
    Error,
    Warn,
    /// Source and download milestones
    Info,
    /// Request and response flow per source
    Debug,
    /// Everything, including per-lease tracing
    Trace,
}

impl CliLogLevel {
    /// Converts CLI log level to tracing Level enum.
    ///
    /// # Examples
    /// ```
    /// use shoal_core::tracing_setup::CliLogLevel;
    ///
    /// let level = CliLogLevel::Info.as_tracing_level();
    /// assert_eq!(level, tracing::Level::INFO);
    /// ```
    pub fn as_tracing_level(self) -> Level {
        match self {
            CliLogLevel::Error => Level::ERROR,
            CliLogLevel::Warn => Level::WARN,
            CliLogLevel::Info => Level::INFO,
            CliLogLevel::Debug => Level::DEBUG,
            CliLogLevel::Trace => Level::TRACE,
        }
    }
}

impl std::fmt::Display for CliLogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let level = self.as_tracing_level().as_str().to_ascii_lowercase();
        f.write_str(&level)
    }
}
