//! `airlock` - encrypted telemetry receiver CLI
//!
//! This binary runs the UDP receiver with its query API, plays the sender
//! role for testing deployments, and inspects stored telemetry.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use airlock::admission::AdmissionFilter;
use airlock::api::{self, AppState};
use airlock::cli::{Cli, Command, ConfigCommand, LastCommand, SendCommand};
use airlock::codec::{Codec, SecretKey};
use airlock::ingest::{Ingestor, Pipeline};
use airlock::reading::epoch_now;
use airlock::sender::TelemetrySender;
use airlock::storage::{Store, Window};
use airlock::{init_logging, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    // Execute the command
    match cli.command {
        Command::Serve => handle_serve(&config).await,
        Command::Send(send_cmd) => handle_send(&config, &send_cmd).await,
        Command::Last(last_cmd) => handle_last(&config, &last_cmd),
        Command::Keygen => {
            println!("{}", SecretKey::generate().to_base64());
            Ok(())
        }
        Command::Config(config_cmd) => handle_config(&config, &config_cmd),
    }
}

/// Run the receiver and (if enabled) the query API until interrupted.
async fn handle_serve(config: &Config) -> anyhow::Result<()> {
    let codec = Codec::new(config.secret_key()?);
    let filter = AdmissionFilter::new(config.admission.max_skew_secs, config.admission.seen_window);
    let db_path = config.database_path();

    // The ingestion loop is the sole writer; the API gets its own reader
    // connection to the same file.
    let pipeline = Pipeline::new(codec.clone(), filter, Store::open(&db_path)?);
    let ingestor = Ingestor::bind(&config.transport.bind, pipeline)
        .await
        .with_context(|| format!("failed to bind receiver at {}", config.transport.bind))?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut ingest_handle = tokio::spawn(ingestor.run(shutdown_rx.clone()));

    let mut api_handle = if config.api.enabled {
        let state = AppState::new(Store::open(&db_path)?, codec);
        let bind = config.api.bind.clone();
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(
            async move { api::serve(&bind, state, rx).await },
        ))
    } else {
        None
    };
    drop(shutdown_rx);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
        result = &mut ingest_handle => {
            result??;
            anyhow::bail!("receiver stopped unexpectedly");
        }
        result = async {
            match api_handle.as_mut() {
                Some(handle) => handle.await,
                None => std::future::pending().await,
            }
        } => {
            result??;
            anyhow::bail!("query API stopped unexpectedly");
        }
    }

    // Graceful shutdown: both tasks finish their in-flight work and drop
    // their handles before we return.
    let _ = shutdown_tx.send(true);
    ingest_handle.await??;
    if let Some(handle) = api_handle {
        handle.await??;
    }
    Ok(())
}

/// Emit encrypted sample telemetry at a receiver.
async fn handle_send(config: &Config, cmd: &SendCommand) -> anyhow::Result<()> {
    let codec = Codec::new(config.secret_key()?);
    let target = cmd
        .target
        .clone()
        .unwrap_or_else(|| config.transport.bind.clone());

    println!("Sending encrypted telemetry to udp://{target}");
    let mut sender = TelemetrySender::connect(target, codec).await?;
    sender
        .run(cmd.count, Duration::from_millis(cmd.interval_ms))
        .await?;
    Ok(())
}

/// Print the most recent stored readings.
fn handle_last(config: &Config, cmd: &LastCommand) -> anyhow::Result<()> {
    let store = Store::open(config.database_path())?;
    let rows = store.range(Window::All, cmd.count, epoch_now())?;

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No rows stored yet. Run `airlock serve` and point a sender at it.");
        return Ok(());
    }

    for (i, row) in rows.iter().enumerate() {
        println!(
            "{:02}. id={} received={} ts={} alt={} spd={} bat={} lat={} lon={}",
            i + 1,
            row.msg_id,
            format_received(row.inserted_at),
            fmt_opt(row.ts),
            fmt_opt(row.altitude),
            fmt_opt(row.speed),
            fmt_opt(row.battery),
            fmt_opt(row.lat),
            fmt_opt(row.lon),
        );
    }
    Ok(())
}

/// Render an optional measurement for table output.
fn fmt_opt(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.3}"))
}

/// Render a receipt timestamp as local-free UTC wall time.
#[allow(clippy::cast_possible_truncation)]
fn format_received(epoch_secs: f64) -> String {
    chrono::DateTime::from_timestamp(epoch_secs as i64, 0)
        .map_or_else(|| "-".to_string(), |dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}

/// View or validate configuration.
fn handle_config(config: &Config, cmd: &ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if *json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Transport]");
                println!("  UDP bind:        {}", config.transport.bind);
                println!();
                println!("[API]");
                println!("  Enabled:         {}", config.api.enabled);
                println!("  HTTP bind:       {}", config.api.bind);
                println!();
                println!("[Storage]");
                println!("  Database path:   {}", config.database_path().display());
                println!();
                println!("[Admission]");
                println!("  Max skew (s):    {}", config.admission.max_skew_secs);
                println!("  Seen window:     {}", config.admission.seen_window);
                println!();
                println!("[Crypto]");
                println!(
                    "  Key:             {}",
                    if config.crypto.key.is_some() {
                        "configured"
                    } else {
                        "not set"
                    }
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.clone().unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
