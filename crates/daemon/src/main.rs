//! rebaiser daemon entry point.
//!
//! Loads configuration, wires the collaborators into a rebase pipeline and
//! runs it once or on a schedule until a termination signal arrives.

mod signals;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rebaiser_core::ai::OpenAiAssistant;
use rebaiser_core::config::AppConfig;
use rebaiser_core::git::{GitCli, GitHubClient};
use rebaiser_core::notify::NotificationDispatcher;
use rebaiser_core::pipeline::{Pipeline, PipelineSettings, Services};
use rebaiser_core::scheduler::{Scheduler, Shutdown};
use rebaiser_core::test_runner::ProcessRunner;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// AI-assisted rebase daemon.
#[derive(Parser, Debug)]
#[command(
    name = "rebaiser",
    version,
    about = "Keeps an internal fork rebased onto its upstream, resolving conflicts with an LLM"
)]
struct Args {
    /// Path to the YAML (or .toml) configuration file.
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Resolve and test, but do not push or open a pull request.
    #[arg(long)]
    dry_run: bool,

    /// Run the pipeline once and exit instead of running on the interval.
    #[arg(long)]
    once: bool,

    /// Keep the working directory after the run.
    #[arg(long)]
    keep_artifacts: bool,
}

fn init_tracing(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config =
        AppConfig::load_from_file(&args.config).context("failed to load configuration file")?;
    config.apply_env_overrides();
    if args.dry_run {
        config.daemon.dry_run = true;
    }
    if args.keep_artifacts {
        config.daemon.keep_artifacts = true;
    }
    config.apply_defaults();
    config
        .validate()
        .context("configuration validation failed")?;
    Ok(config)
}

fn build_services(config: &AppConfig) -> Result<Services> {
    let git = GitCli::from_config(&config.git, config.github.token.clone());

    let ai = OpenAiAssistant::from_config(&config.ai).context("failed to initialize AI client")?;

    let code_host = match GitHubClient::from_config(&config.github) {
        Ok(client) => client,
        Err(e) if config.daemon.dry_run => {
            warn!(error = %e, "GitHub client unavailable, continuing because of dry run");
            GitHubClient::new(
                config.github.api_url.clone(),
                config.github.repo.clone(),
                String::new(),
                Duration::from_secs(config.github.timeout_secs),
            )
            .context("failed to initialize GitHub client")?
        }
        Err(e) => return Err(e).context("failed to initialize GitHub client"),
    };

    let notifier = NotificationDispatcher::new(&config.notifications);
    if !notifier.is_configured() {
        warn!("no notification channel configured, run results are only logged");
    }

    Ok(Services {
        git: Arc::new(git),
        ai: Arc::new(ai),
        code_host: Arc::new(code_host),
        notifier: Arc::new(notifier),
        tests: Arc::new(ProcessRunner::new()),
    })
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.daemon.log_level.clone());
    init_tracing(&log_level, args.log_format);

    // Startup banner
    info!("========================================");
    info!("  rebaiser v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file    : {}", args.config.display());
    info!("Internal repo  : {}", config.git.internal_repo);
    info!("Upstream repo  : {}", config.git.upstream_repo);
    info!("Base branch    : {}", config.git.branch);
    info!("GitHub repo    : {}", config.github.repo);
    info!("AI model       : {}", config.ai.model);
    info!("Test commands  : {}", config.tests.commands.len());
    info!("Interval       : {}s", config.daemon.interval_secs);
    info!("Mode           : {}", if args.once { "once" } else { "periodic" });
    info!("Dry run        : {}", config.daemon.dry_run);
    info!("Keep artifacts : {}", config.daemon.keep_artifacts);
    info!("Log level      : {}", log_level);
    info!("========================================");

    let services = build_services(&config)?;
    let pipeline = Arc::new(Pipeline::new(PipelineSettings::from_config(&config), services));
    let scheduler = Scheduler::new(pipeline, config.interval(), args.once);

    let shutdown = Shutdown::new();
    let listener = signals::spawn_listener(shutdown.clone());

    let result = scheduler.run(shutdown).await;
    listener.abort();

    match result {
        Ok(()) => {
            info!("rebaiser stopped.");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "rebase run failed");
            Err(e).context("rebase run failed")
        }
    }
}
