//! panelgen - Concurrent panel image generation
//!
//! CLI entry point for generating panel batches and inspecting providers.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use panelgen::cli::{Cli, Command, OutputFormat, load_panels};
use panelgen::config::Config;
use panelgen::domain::{ImageQuality, ImageSize, PanelOutcome};
use panelgen::provider::{ProviderInfo, create_provider};
use panelgen::queue::{QueueStatus, WorkerPool};
use panelgen::stats::StatisticsSnapshot;

fn parse_level(level_str: Option<&str>) -> tracing::Level {
    match level_str {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    }
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>, to_stderr: bool) -> Result<()> {
    // Priority: CLI --log-level > config file > INFO
    let level = parse_level(cli_log_level.or(config_log_level));
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if to_stderr {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_env_filter(filter)
            .init();
    } else {
        let log_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("panelgen")
            .join("logs");
        fs::create_dir_all(&log_dir).context("Failed to create log directory")?;
        let log_file = fs::File::create(log_dir.join("panelgen.log")).context("Failed to create log file")?;

        tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_ansi(false)
            .with_env_filter(filter)
            .init();
    }

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref(), cli.log_stderr)
        .context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(providers = config.providers.len(), fallback = %config.fallback, "panelgen loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Run {
            panels,
            provider,
            timeout_secs,
            include_bytes,
        } => {
            debug!(?panels, ?provider, ?timeout_secs, include_bytes, "main: matched Run command");
            cmd_run(&config, &panels, provider.as_deref(), timeout_secs, include_bytes).await
        }
        Command::Estimate { count, size, quality } => {
            debug!(count, ?size, ?quality, "main: matched Estimate command");
            cmd_estimate(&config, count, size, quality)
        }
        Command::Providers { format } => {
            debug!(?format, "main: matched Providers command");
            cmd_providers(&config, format)
        }
        Command::Config => {
            debug!("main: matched Config command");
            cmd_config(&config)
        }
    }
}

#[derive(Serialize)]
struct RunReport {
    completed: bool,
    outcomes: Vec<PanelOutcome>,
    statistics: StatisticsSnapshot,
    status: QueueStatus,
}

async fn cmd_run(
    config: &Config,
    panels_path: &Path,
    provider: Option<&str>,
    timeout_secs: Option<u64>,
    include_bytes: bool,
) -> Result<()> {
    debug!(?panels_path, ?provider, "cmd_run: called");
    config.validate().context("Invalid configuration")?;

    if let Some(name) = provider
        && config.provider(name).is_none()
    {
        return Err(eyre::eyre!("Unknown provider: {}", name));
    }

    let specs: Vec<_> = load_panels(panels_path)?
        .into_iter()
        .map(|panel| panel.into_spec(provider))
        .collect();
    info!(count = specs.len(), "Loaded panels from {}", panels_path.display());

    let pool = WorkerPool::from_config(config).context("Failed to build worker pool")?;
    pool.start();
    pool.add_tasks_batch(specs).context("Failed to enqueue panels")?;

    let completed = pool.wait_for_completion(timeout_secs.map(Duration::from_secs)).await;
    if !completed {
        warn!("Timed out waiting for panels; stopping workers");
        eprintln!("Warning: timed out before every panel finished");
    }
    pool.stop().await;

    let mut outcomes = pool.outcomes();
    if !include_bytes {
        for outcome in &mut outcomes {
            outcome.image_bytes = None;
        }
    }

    let report = RunReport {
        completed,
        outcomes,
        statistics: pool.get_statistics(),
        status: pool.get_queue_status(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn cmd_estimate(config: &Config, count: usize, size: Option<ImageSize>, quality: Option<ImageQuality>) -> Result<()> {
    debug!(count, "cmd_estimate: called");
    println!("Estimated cost for {} image(s):", count);
    for provider_config in &config.providers {
        match create_provider(provider_config) {
            Ok(provider) => {
                let cost = provider.estimate_cost(count, size, quality);
                println!("  {:<16} ${:.2}", provider.name(), cost);
            }
            Err(e) => {
                debug!(name = %provider_config.name, error = %e, "cmd_estimate: provider unavailable");
                println!("  {:<16} unavailable ({})", provider_config.name, e);
            }
        }
    }
    Ok(())
}

fn cmd_providers(config: &Config, format: OutputFormat) -> Result<()> {
    debug!(?format, "cmd_providers: called");
    let infos: Vec<ProviderInfo> = config.providers.iter().map(ProviderInfo::from_config).collect();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&infos)?);
        }
        OutputFormat::Text => {
            println!("Fallback strategy: {}", config.fallback);
            for (index, info) in infos.iter().enumerate() {
                println!(
                    "{}. {} ({}) quality={} size={} rate-limit={}/min cost=${:.3}",
                    index + 1,
                    info.name,
                    info.provider_type,
                    info.quality,
                    info.default_size,
                    info.rate_limit,
                    info.cost_per_image
                );
            }
        }
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let mut redacted = config.clone();
    for provider in &mut redacted.providers {
        if provider.api_key.is_some() {
            provider.api_key = Some("<redacted>".to_string());
        }
    }
    print!("{}", serde_yaml::to_string(&redacted).context("Failed to serialize config")?);
    Ok(())
}
