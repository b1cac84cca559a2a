// Module-specific lints configuration
#![allow(clippy::uninlined_format_args)]

use anyhow::{Result, Context};
use log::{error, warn, info, LevelFilter, Log, Metadata, Record, Level, SetLoggerError};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use clap::{Parser, ValueEnum, CommandFactory, Subcommand};
use clap_complete::{generate, Shell};
use tokio::io::{AsyncBufRead, BufReader};

use subtrans::app_config::{self, Config};
use subtrans::Controller;

/// CLI Wrapper for LogLevel to implement ValueEnum
#[derive(Debug, Clone, ValueEnum)]
enum CliLogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<CliLogLevel> for app_config::LogLevel {
    fn from(cli_level: CliLogLevel) -> Self {
        match cli_level {
            CliLogLevel::Error => app_config::LogLevel::Error,
            CliLogLevel::Warn => app_config::LogLevel::Warn,
            CliLogLevel::Info => app_config::LogLevel::Info,
            CliLogLevel::Debug => app_config::LogLevel::Debug,
            CliLogLevel::Trace => app_config::LogLevel::Trace,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ingest task events and run translation jobs until the input ends
    ///
    /// Once the input ends, queued and running jobs finish but task retries still
    /// waiting on their timer are cancelled. Pass --wait-retries to let them run.
    Run(RunArgs),

    /// Generate shell completions for subtrans
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Newline-delimited JSON events, `-` for stdin
    #[arg(short, long, value_name = "FILE", default_value = "-")]
    events: String,

    /// Configuration file path
    #[arg(short, long, env = "SUBTRANS_CONFIG", default_value = "conf.json")]
    config_path: PathBuf,

    /// Set logging level
    #[arg(short, long, value_enum, env = "SUBTRANS_LOG_LEVEL")]
    log_level: Option<CliLogLevel>,

    /// Number of parallel workers
    #[arg(short, long, env = "SUBTRANS_WORKERS")]
    workers: Option<usize>,

    /// SQLite database file
    #[arg(short, long, env = "SUBTRANS_DATABASE")]
    database: Option<PathBuf>,

    /// Translation API key
    #[arg(long, env = "SUBTRANS_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// After the input ends, wait for pending task retries before shutting down
    #[arg(long)]
    wait_retries: bool,
}

/// subtrans - subtitle translation job runner
///
/// Reads upstream task events, records them and translates finished tasks'
/// subtitle documents with a streaming LLM API.
#[derive(Parser, Debug)]
#[command(name = "subtrans")]
#[command(version)]
#[command(about = "Resilient subtitle translation job runner")]
#[command(long_about = "subtrans records upstream task events and translates the subtitle documents of finished tasks.

EXAMPLES:
    subtrans run --events events.ndjson          # Process a file of events
    tail -f events.ndjson | subtrans run        # Process events from stdin
    subtrans run -w 8 --log-level debug         # More workers, verbose logging
    subtrans run -e events.ndjson --wait-retries # Let task retries finish before exiting
    subtrans completions bash > subtrans.bash   # Generate bash completions

CONFIGURATION:
    Configuration is stored in conf.json by default. You can specify a different
    config file with --config-path. If the config file doesn't exist, a default one
    will be created automatically.")]
struct CommandLineOptions {
    #[command(subcommand)]
    command: Commands,
}

// @struct: Custom logger implementation
struct CustomLogger {
    level: LevelFilter,
}

impl CustomLogger {
    // @creates: New logger with specified level
    fn new(level: LevelFilter) -> Self {
        CustomLogger { level }
    }

    // @initializes: Global logger
    fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
        // The logger lets everything through; `log::set_max_level` does the filtering
        let logger = Box::new(CustomLogger::new(LevelFilter::Trace));
        log::set_boxed_logger(logger)?;
        log::set_max_level(level);
        Ok(())
    }

    // @returns: ANSI colour for log level
    fn color_for_level(level: Level) -> &'static str {
        match level {
            Level::Error => "\x1B[1;31m",
            Level::Warn => "\x1B[1;33m",
            Level::Info => "\x1B[1;32m",
            Level::Debug => "\x1B[1;36m",
            Level::Trace => "\x1B[1;35m",
        }
    }
}

impl Log for CustomLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            let mut stderr = std::io::stderr();
            let _ = writeln!(
                stderr,
                "{}{} {:<5} {}\x1B[0m",
                Self::color_for_level(record.level()),
                now,
                record.level(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    CustomLogger::init(LevelFilter::Info)?;

    let cli = CommandLineOptions::parse();

    match cli.command {
        Commands::Completions { shell } => {
            let mut cmd = CommandLineOptions::command();
            generate(shell, &mut cmd, "subtrans", &mut std::io::stdout());
            Ok(())
        }
        Commands::Run(args) => run(args).await,
    }
}

async fn run(options: RunArgs) -> Result<()> {
    if let Some(cmd_log_level) = &options.log_level {
        let level: app_config::LogLevel = cmd_log_level.clone().into();
        log::set_max_level(LevelFilter::from(&level));
    }

    let mut config = Config::load_or_create(&options.config_path)?;

    if let Some(log_level) = &options.log_level {
        config.log_level = log_level.clone().into();
    }
    if let Some(workers) = options.workers {
        config.jobs.workers = workers;
        config.database.max_connections = config.database.max_connections.max(workers + 2);
    }
    if let Some(database) = &options.database {
        config.database.path = database.clone();
    }
    if let Some(api_key) = &options.api_key {
        config.translation.api_key = api_key.clone();
    }

    config.validate()
        .context("Configuration validation failed")?;

    if options.log_level.is_none() {
        log::set_max_level(LevelFilter::from(&config.log_level));
    }

    let controller = Controller::with_config(config)?;

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if options.events == "-" {
        info!("Reading events from stdin");
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        info!("Reading events from {}", options.events);
        let file = tokio::fs::File::open(&options.events)
            .await
            .with_context(|| format!("Failed to open events file: {}", options.events))?;
        Box::new(BufReader::new(file))
    };

    let ingest_result = tokio::select! {
        result = controller.run_event_stream(reader) => Some(result),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down");
            None
        }
    };

    let interrupted = ingest_result.is_none();
    match ingest_result {
        Some(Ok(summary)) => info!(
            "Event stream finished: {} events, {} jobs queued, {} malformed, {} failed",
            summary.events, summary.jobs_submitted, summary.malformed, summary.failed
        ),
        Some(Err(e)) => error!("Event stream failed: {:#}", e),
        None => {}
    }

    if options.wait_retries && !interrupted {
        info!("Waiting for pending task retries");
        tokio::select! {
            _ = controller.wait_until_idle(Duration::from_secs(1)) => {}
            _ = tokio::signal::ctrl_c() => warn!("Interrupted, cancelling pending retries"),
        }
    }

    let stats = controller.shutdown().await;
    info!(
        "Done: {} completed, {} abandoned, {} retries scheduled",
        stats.completed, stats.abandoned, stats.retries_scheduled
    );

    Ok(())
}
