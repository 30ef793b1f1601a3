// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 LLM Tunnel Manager Contributors

// LLM Tunnel Manager - Daemon
// Keeps the connection manager running and logs every health-check pass

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use llm_tunnel_common::Capabilities;
use llm_tunnel_daemon::{FileTokenProvider, TomlConfigStore, TunnelManager};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "llm_tunnel_daemon=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("LLM Tunnel Manager Daemon starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let store = TomlConfigStore::open_default()?;
    info!("Configuration file: {}", store.path().display());

    let tokens = FileTokenProvider::new(FileTokenProvider::default_path()?);
    debug!("Reading cloud tokens from: {}", tokens.path().display());

    let capabilities = Capabilities::detect();
    info!("Tunnel publisher supported: {}", capabilities.tunnel_publisher);

    let manager = TunnelManager::with_http_probes(Arc::new(store), Arc::new(tokens), capabilities)
        .context("Failed to create tunnel manager")?;

    // Subscribe before the first pass so it gets logged too
    let mut subscription = manager.subscribe();
    tokio::spawn(async move {
        while let Some(snapshot) = subscription.recv().await {
            info!("Health check #{}: {}", snapshot.pass, snapshot.state);
            for status in snapshot.statuses.values() {
                match &status.error {
                    None => debug!(
                        "  {} -> {} ({:.1} ms)",
                        status.name,
                        status.endpoint,
                        status.latency_ms.unwrap_or_default()
                    ),
                    Some(error) => debug!("  {} -> {}: {}", status.name, status.endpoint, error),
                }
            }
        }
    });

    manager
        .initialize()
        .await
        .context("Failed to initialize tunnel manager")?;

    match manager.best_connection().await {
        Some(kind) => info!("Preferred connection: {}", kind),
        None => warn!("No connection available yet"),
    }

    wait_for_shutdown(manager).await;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM, then stop the manager
async fn wait_for_shutdown(manager: TunnelManager) {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        info!("Received Ctrl+C, shutting down");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                };
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl+C, shutting down");
                }
            }
        }
    }

    #[cfg(not(unix))]
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C, shutting down");
    }

    manager.shutdown().await;
}
