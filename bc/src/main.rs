//! bc - Fan-out broadcaster demo
//!
//! Casts every stdin line to a set of subscribers and reports what each one received.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use broadcaster::Broadcaster;
use broadcaster::cli::{Cli, Command, OutputFormat};
use broadcaster::config::Config;

/// What one subscriber saw during a fanout run
#[derive(Debug, Serialize)]
struct SubscriberSummary {
    name: String,
    received: u64,
}

/// Result of a fanout run
#[derive(Debug, Serialize)]
struct FanoutSummary {
    casts: u64,
    subscribers: Vec<SubscriberSummary>,
}

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("broadcaster")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
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
    };

    let log_file = fs::File::create(log_dir.join("bc.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Fanout {
            subscribers,
            wait_time_ms,
            consumer_delay_ms,
            format,
        } => cmd_fanout(&config, subscribers, wait_time_ms, consumer_delay_ms, format).await,
        Command::Config => {
            print!("{}", config.to_yaml()?);
            Ok(())
        }
    }
}

async fn cmd_fanout(
    config: &Config,
    subscribers: usize,
    wait_time_ms: Option<u64>,
    consumer_delay_ms: u64,
    format: OutputFormat,
) -> Result<()> {
    debug!(subscribers, ?wait_time_ms, consumer_delay_ms, %format, "cmd_fanout: called");
    let mut bc_config = config.broadcaster.clone();
    if let Some(ms) = wait_time_ms {
        bc_config.wait_time_ms = ms;
    }

    let broadcaster = Broadcaster::<String>::new(bc_config).context("Failed to create broadcaster")?;
    let delay = Duration::from_millis(consumer_delay_ms);
    let echo = format == OutputFormat::Text;

    let mut readers = Vec::with_capacity(subscribers);
    for i in 0..subscribers {
        let mut sub = broadcaster.subscribe(None).await;
        let name = format!("sub-{}", i);
        readers.push(tokio::spawn(async move {
            let mut received = 0;
            while let Some(line) = sub.recv().await {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if echo {
                    println!("{} {}", format!("[{}]", name).cyan(), line);
                }
                received += 1;
            }
            SubscriberSummary { name, received }
        }));
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut casts = 0;
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        broadcaster.cast(line).await?;
        casts += 1;
    }

    broadcaster.close().await?;
    info!(casts, "cmd_fanout: input exhausted, broadcaster closed");

    let mut summary = FanoutSummary {
        casts,
        subscribers: Vec::with_capacity(subscribers),
    };
    for reader in readers {
        summary.subscribers.push(reader.await.context("Subscriber task failed")?);
    }

    match format {
        OutputFormat::Text => {
            println!("{} {}", "casts:".bold(), summary.casts);
            for sub in &summary.subscribers {
                let received = if sub.received == summary.casts {
                    sub.received.to_string().green()
                } else {
                    sub.received.to_string().yellow()
                };
                println!("{}: {} received", sub.name, received);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }

    Ok(())
}
