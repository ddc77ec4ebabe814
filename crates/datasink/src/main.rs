// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! datasink CLI
//!
//! # Usage
//!
//! ```bash
//! # Write an example configuration
//! datasink gen-config --output datasink.toml
//!
//! # Check a configuration file
//! datasink --config datasink.toml validate
//!
//! # Initialize a fresh InfluxDB instance (user, org, bucket, token)
//! datasink --config datasink.toml init-db
//!
//! # Run the collector
//! datasink --config datasink.toml
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use datasink::config::DatabaseKind;
use datasink::database::{influxdb, Database, InfluxDbClient, MemoryDatabase, TimeSeriesWriter};
use datasink::http::{self, AppState};
use datasink::{Config, Pipeline};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// MQTT telemetry collector
#[derive(Parser, Debug)]
#[command(name = "datasink")]
#[command(about = "Collect IoT telemetry over MQTT and store it in InfluxDB")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "datasink.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Initialize the InfluxDB instance from the configuration
    InitDb,

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "datasink.toml")]
        output: PathBuf,
    },

    /// Validate the configuration file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.command {
        Some(Commands::GenConfig { output }) => cmd_gen_config(output),
        Some(Commands::Validate) => cmd_validate(args.config),
        Some(Commands::InitDb) => cmd_init_db(args.config).await,
        None => cmd_run(args.config).await,
    }
}

async fn cmd_run(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load(&config_path)?;
    tracing::info!("datasink v{}", env!("CARGO_PKG_VERSION"));

    match config.database.kind {
        DatabaseKind::InfluxDb => {
            let client = InfluxDbClient::new(&config.database.influxdb)
                .context("Cannot create InfluxDB client")?;
            tracing::info!(
                "Writing to InfluxDB at {} (bucket '{}')",
                config.database.influxdb.address,
                config.database.influxdb.bucket
            );
            run(config, client).await
        }
        DatabaseKind::Memory => {
            tracing::warn!("Using the in-memory database, nothing is persisted");
            run(config, MemoryDatabase::new()).await
        }
    }
}

async fn run<D: Database>(config: Config, db: D) -> anyhow::Result<()> {
    let write_mode = config.database.influxdb.write_mode();
    tracing::info!("Write mode: {:?}", write_mode);

    let writer = TimeSeriesWriter::new(db, write_mode);
    let pipeline = Pipeline::new(&config, writer).await?;
    let cancel = CancellationToken::new();

    let http_task = config.http.enabled.then(|| {
        let state = Arc::new(AppState::new(pipeline.stats(), pipeline.writer_stats()));
        http::spawn(config.http.address.clone(), state, cancel.clone())
    });

    tokio::spawn(shutdown_on_signal(cancel.clone()));

    let result = pipeline.run(cancel.clone()).await;
    cancel.cancel();
    let http_result = match http_task {
        Some(task) => task.await?,
        None => Ok(()),
    };

    result?;
    http_result.with_context(|| format!("HTTP server on {} failed", config.http.address))?;
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                    _ = cancel.cancelled() => return,
                }
            }
            Err(e) => {
                tracing::warn!("Cannot install SIGTERM handler: {}", e);
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = cancel.cancelled() => return,
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = cancel.cancelled() => return,
        }
    }

    tracing::info!("Shutting down...");
    cancel.cancel();
}

async fn cmd_init_db(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load(&config_path)?;
    let influx = &config.database.influxdb;
    if influx.setup.username.is_empty() || influx.setup.password.is_empty() {
        anyhow::bail!("database.influxdb.setup.username and password are required for init-db");
    }
    if influx.token.is_empty() {
        anyhow::bail!("database.influxdb.token is required for init-db");
    }

    influxdb::setup(influx)
        .await
        .with_context(|| format!("InfluxDB setup at {} failed", influx.address))?;
    println!(
        "InfluxDB initialized: org '{}', bucket '{}'",
        influx.organization, influx.bucket
    );
    Ok(())
}

fn cmd_gen_config(output: PathBuf) -> anyhow::Result<()> {
    let toml_str = toml::to_string_pretty(&Config::example())?;

    let content = format!(
        r#"# datasink configuration
# Generated by datasink gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)
        .with_context(|| format!("Cannot write {}", output.display()))?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    let config = load(&config_path)?;
    println!("Configuration valid!");
    println!();
    println!("MQTT listener: {}", config.mqtt.address);
    println!(
        "Authentication: {}",
        if config.mqtt.auth.is_some() {
            "htpasswd"
        } else {
            "disabled"
        }
    );
    println!("Topic rules: {}", config.mqtt.topics.len());
    for (user, topic) in &config.mqtt.topics {
        println!("  {} -> {}", user, topic);
    }
    println!("Database: {:?}", config.database.kind);
    println!("Write mode: {:?}", config.database.influxdb.write_mode());
    Ok(())
}

fn load(path: &Path) -> anyhow::Result<Config> {
    Config::from_file(path).with_context(|| format!("Cannot load configuration {}", path.display()))
}
