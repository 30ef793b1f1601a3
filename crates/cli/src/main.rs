// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 LLM Tunnel Manager Contributors

// LLM Tunnel Manager - CLI Client
// Command-line interface for checking and configuring LLM connections

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};

use llm_tunnel_common::{Capabilities, OverallState, StatusSnapshot, TunnelConfig};
use llm_tunnel_daemon::{ConfigStore, FileTokenProvider, TomlConfigStore, TunnelManager};

#[derive(Parser)]
#[command(name = "llm-tunnel")]
#[command(about = "LLM Tunnel Manager CLI", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default: <config dir>/llm-tunnel/tunnel.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// File holding the cloud access token
    #[arg(long, global = true)]
    token_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check every enabled connection once
    Status {
        /// Output as JSON for scripting
        #[arg(short, long)]
        json: bool,

        /// Run a second, forced pass after the first and report that one
        #[arg(short, long)]
        force: bool,
    },

    /// Keep checking and print each result until Ctrl+C
    Watch,

    /// Show or change the stored configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show {
        /// Output as JSON instead of TOML
        #[arg(short, long)]
        json: bool,
    },

    /// Change a single setting
    Set { key: String, value: String },

    /// Restore the defaults
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; library chatter stays quiet unless RUST_LOG asks for it
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = match &cli.config {
        Some(path) => TomlConfigStore::new(path),
        None => TomlConfigStore::open_default()?,
    };

    match cli.command {
        Commands::Status { json, force } => {
            let manager = build_manager(store, cli.token_file)?;
            show_status(&manager, json, force).await?;
        }
        Commands::Watch => {
            let manager = build_manager(store, cli.token_file)?;
            watch(&manager).await?;
        }
        Commands::Config { action } => match action {
            ConfigCommands::Show { json } => show_config(&store, json)?,
            ConfigCommands::Set { key, value } => {
                let mut config = store.load()?.unwrap_or_default();
                config::apply_setting(&mut config, &key, &value)?;
                let manager = build_manager(store, cli.token_file)?;
                save_config(&manager, config).await?;
                println!("{} {} = {}", "✓".green(), key.cyan(), value);
            }
            ConfigCommands::Reset => {
                let manager = build_manager(store, cli.token_file)?;
                save_config(&manager, TunnelConfig::default()).await?;
                println!("{} Configuration reset to defaults", "✓".green());
            }
        },
    }

    Ok(())
}

fn build_manager(store: TomlConfigStore, token_file: Option<PathBuf>) -> Result<TunnelManager> {
    let token_path = match token_file {
        Some(path) => path,
        None => FileTokenProvider::default_path()?,
    };
    let tokens = FileTokenProvider::new(token_path);

    TunnelManager::with_http_probes(Arc::new(store), Arc::new(tokens), Capabilities::detect())
        .context("Failed to create tunnel manager")
}

/// Run the first pass (plus a forced one for `status --force`) and print it
async fn show_status(manager: &TunnelManager, json: bool, force: bool) -> Result<()> {
    if !json {
        println!("{}", "Checking connections...".dimmed());
    }
    manager
        .initialize()
        .await
        .context("Failed to initialize tunnel manager")?;
    if force {
        manager.reconnect().await;
    }

    let snapshot = manager.latest_snapshot().await;
    manager.shutdown().await;

    let snapshot = snapshot.context("No health check completed")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&*snapshot)?);
        return Ok(());
    }

    print_status_table(&snapshot);
    print_summary(manager, &snapshot).await;
    Ok(())
}

async fn watch(manager: &TunnelManager) -> Result<()> {
    let mut subscription = manager.subscribe();
    manager
        .initialize()
        .await
        .context("Failed to initialize tunnel manager")?;

    let interval = manager.config().await.health_check_interval_secs;
    println!(
        "Watching connections every {}s. Press {} to stop.",
        interval,
        "Ctrl+C".yellow()
    );

    loop {
        tokio::select! {
            snapshot = subscription.recv() => {
                let Some(snapshot) = snapshot else {
                    break;
                };
                println!();
                println!(
                    "{} {}",
                    format!("Pass #{}", snapshot.pass).bold(),
                    snapshot
                        .completed_at
                        .with_timezone(&chrono::Local)
                        .format("%H:%M:%S")
                        .to_string()
                        .dimmed()
                );
                print_status_table(&snapshot);
                print_summary(manager, &snapshot).await;
            }
            _ = tokio::signal::ctrl_c() => {
                println!();
                println!("{}", "Stopping...".yellow());
                break;
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

fn print_status_table(snapshot: &StatusSnapshot) {
    if snapshot.statuses.is_empty() {
        println!("{}", "No connections enabled.".yellow());
        println!(
            "Enable one with: {}",
            "llm-tunnel config set enable_local_runtime true".cyan()
        );
        return;
    }

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);

    // Header
    table.set_header(
        ["Connection", "State", "Endpoint", "Latency", "Version", "Details"]
            .into_iter()
            .map(|title| {
                Cell::new(title)
                    .add_attribute(Attribute::Bold)
                    .fg(Color::Cyan)
            }),
    );

    // Rows
    for status in snapshot.statuses.values() {
        let state = if status.is_connected {
            Cell::new("connected").fg(Color::Green)
        } else {
            Cell::new("disconnected").fg(Color::Red)
        };

        let latency = status
            .latency_ms
            .map(|ms| format!("{:.0} ms", ms))
            .unwrap_or_else(|| "-".to_string());

        let details = match &status.error {
            Some(error) => error.clone(),
            None if !status.models.is_empty() => format!("{} models", status.models.len()),
            None => "-".to_string(),
        };

        table.add_row(vec![
            Cell::new(&status.name),
            state,
            Cell::new(&status.endpoint),
            Cell::new(latency),
            Cell::new(status.version.as_deref().unwrap_or("-")),
            Cell::new(details),
        ]);
    }

    println!("{table}");
}

async fn print_summary(manager: &TunnelManager, snapshot: &StatusSnapshot) {
    let overall = match snapshot.state {
        OverallState::Connected => "connected".green(),
        OverallState::Degraded => "degraded".yellow(),
        OverallState::Disconnected => "disconnected".red(),
    };
    println!("Overall: {}", overall.bold());

    match manager.best_connection().await {
        Some(kind) => println!("Preferred route: {}", kind.to_string().cyan()),
        None => println!("Preferred route: {}", "none".red()),
    }
}

fn show_config(store: &TomlConfigStore, json: bool) -> Result<()> {
    let (config, stored) = match store.load()? {
        Some(config) => (config, true),
        None => (TunnelConfig::default(), false),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    let origin = if stored {
        store.path().display().to_string()
    } else {
        format!("defaults, {} not found", store.path().display())
    };
    println!("{} {}", "#".dimmed(), origin.dimmed());
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Apply a config through the manager so it is validated before it is saved
async fn save_config(manager: &TunnelManager, config: TunnelConfig) -> Result<()> {
    manager.update_configuration(config).await?;
    Ok(())
}
