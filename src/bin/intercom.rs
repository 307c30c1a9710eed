//! Intercom application
//!
//! Runs the mix-minus pipeline on the local microphone and speaker. Remote
//! participants are expected to be fed by a transport through the library
//! API; this binary only hosts the local side and reports status.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mixminus_intercom::{
    audio::HardwareDriver,
    config::AppConfig,
    AudioPipeline, PipelineEvent, StreamHandler,
};

/// Command line options
#[derive(Debug, Default)]
struct CliOptions {
    config_path: Option<PathBuf>,
    save_config: bool,
    participants: Vec<u32>,
    stats_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting mix-minus intercom");

    let options = parse_args();
    let config = load_config(&options)?;

    if options.save_config {
        if let Some(path) = options.config_path.clone().or_else(AppConfig::default_path) {
            config.save(&path)?;
            tracing::info!("Configuration saved to {}", path.display());
        }
    }

    let pipeline = Arc::new(
        AudioPipeline::start(config.engine.clone()).context("Failed to start audio pipeline")?,
    );

    // Subscribe before registering anyone so no event is missed
    let mut event_rx = pipeline.subscribe();
    tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(PipelineEvent::ParticipantRejected(id)) => {
                    tracing::warn!("Participant {} rejected, intercom is full", id);
                }
                Ok(PipelineEvent::Stopped) => {
                    tracing::info!("Pipeline reported stop");
                    break;
                }
                Ok(event) => {
                    tracing::info!("Pipeline event: {:?}", event);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Missed {} pipeline events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    for id in &options.participants {
        if let Err(e) = pipeline.add_participant(*id) {
            tracing::warn!("Could not add participant {}: {}", id, e);
        }
    }

    let handler: Arc<dyn StreamHandler> = pipeline.clone();
    let mut driver = HardwareDriver::start(&config.driver, &config.engine, handler)
        .context("Failed to open audio devices")?;

    let running = Arc::new(AtomicBool::new(true));
    let running_for_signal = running.clone();
    ctrlc::set_handler(move || {
        running_for_signal.store(false, Ordering::SeqCst);
    })
    .context("Failed to install Ctrl+C handler")?;

    tracing::info!("Intercom running - press Ctrl+C to stop");

    let stats_interval = Duration::from_secs(options.stats_interval.unwrap_or(5));
    let mut last_stats_time = Instant::now();

    while running.load(Ordering::Relaxed) {
        while let Some(err) = driver.check_errors() {
            tracing::warn!("Audio stream error: {}", err);
        }

        if last_stats_time.elapsed() >= stats_interval {
            match serde_json::to_string(&pipeline.stats()) {
                Ok(json) => tracing::info!("Stats: {}", json),
                Err(e) => tracing::warn!("Failed to encode stats: {}", e),
            }
            last_stats_time = Instant::now();
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    tracing::info!("Shutting down");
    driver.stop();
    pipeline.stop();

    // Let the event task drain the stop notification
    tokio::time::sleep(Duration::from_millis(20)).await;

    Ok(())
}

fn load_config(options: &CliOptions) -> Result<AppConfig> {
    if let Some(path) = &options.config_path {
        if path.exists() {
            return AppConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()));
        }
        tracing::warn!("Config file {} not found, using defaults", path.display());
        return Ok(AppConfig::default());
    }

    match AppConfig::default_path() {
        Some(path) if path.exists() => {
            tracing::info!("Loading config from {}", path.display());
            AppConfig::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))
        }
        _ => Ok(AppConfig::default()),
    }
}

fn parse_args() -> CliOptions {
    let mut options = CliOptions::default();

    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    options.config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--participant" | "-p" => {
                if i + 1 < args.len() {
                    match args[i + 1].parse() {
                        Ok(id) => options.participants.push(id),
                        Err(_) => tracing::warn!("Ignoring invalid participant id {}", args[i + 1]),
                    }
                    i += 1;
                }
            }
            "--stats" => {
                if i + 1 < args.len() {
                    options.stats_interval = args[i + 1].parse().ok();
                    i += 1;
                }
            }
            "--save-config" => {
                options.save_config = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                tracing::warn!("Unknown argument: {}", other);
            }
        }
        i += 1;
    }

    options
}

fn print_help() {
    println!("Mix-minus intercom");
    println!();
    println!("USAGE:");
    println!("    intercom [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <PATH>        Configuration file (TOML)");
    println!("    -p, --participant <ID>     Register a remote participant (repeatable)");
    println!("        --stats <SECONDS>      Stats reporting interval (default 5)");
    println!("        --save-config          Write the effective configuration and continue");
    println!("    -h, --help                 Print this help");
}
