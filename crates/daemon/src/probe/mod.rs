// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 LLM Tunnel Manager Contributors

//! Connectivity probes, one per transport kind.
//!
//! A probe performs a single bounded check. [`run_probe`] wraps it so that
//! every outcome, including timeouts and panics, becomes a
//! [`ConnectionStatus`].

mod cloud;
mod local;
mod publisher;

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::time::Instant;
use tracing::{debug, warn};

use llm_tunnel_common::{
    is_loopback_address, ConnectionStatus, Error, ProbeError, ProbeKind, Result, TunnelConfig,
};

use crate::auth::TokenProvider;

pub use cloud::CloudRelayProbe;
pub use local::LocalRuntimeProbe;
pub use publisher::TunnelPublisherProbe;

/// What a successful check learned about its transport
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeSuccess {
    /// Round trip of the primary request; the whole check is timed when absent
    pub latency: Option<Duration>,
    pub version: Option<String>,
    pub models: Vec<String>,
    /// Replaces the configured endpoint in the status (e.g. a published URL)
    pub endpoint: Option<String>,
}

/// A single named connectivity check against one transport
#[async_trait]
pub trait ConnectionProbe: Send + Sync {
    fn kind(&self) -> ProbeKind;

    /// Endpoint reported in the status
    fn endpoint(&self) -> String;

    /// Upper bound for one check
    fn timeout(&self) -> Duration;

    async fn check(&self) -> std::result::Result<ProbeSuccess, ProbeError>;
}

/// Run one check, bounded by the probe's timeout, and fold the outcome into
/// a status. Never fails.
pub async fn run_probe(probe: Arc<dyn ConnectionProbe>) -> ConnectionStatus {
    let kind = probe.kind();
    let endpoint = probe.endpoint();
    let started = Instant::now();

    let task_probe = probe.clone();
    let handle = tokio::spawn(async move {
        let limit = task_probe.timeout();
        tokio::time::timeout(limit, task_probe.check()).await
    });

    let status = match handle.await {
        Ok(Ok(Ok(success))) => {
            let latency = success.latency.unwrap_or_else(|| started.elapsed());
            ConnectionStatus::connected(
                kind,
                success.endpoint.unwrap_or(endpoint),
                Some(latency.as_secs_f64() * 1000.0),
                success.version,
                success.models,
            )
        }
        Ok(Ok(Err(e))) => {
            debug!(probe = %kind, category = ?e.kind(), "Probe check failed: {}", e);
            ConnectionStatus::failed(kind, endpoint, e)
        }
        Ok(Err(_elapsed)) => ConnectionStatus::failed(kind, endpoint, ProbeError::Timeout),
        Err(join_error) => {
            warn!("Probe {} aborted: {}", kind, join_error);
            ConnectionStatus::failed(
                kind,
                endpoint,
                ProbeError::Transport("probe aborted".to_string()),
            )
        }
    };

    debug!(
        probe = %kind,
        connected = status.is_connected,
        error = status.error.as_deref().unwrap_or(""),
        "Probe check finished"
    );
    status
}

/// Map a transport-level reqwest error onto the probe error taxonomy
pub(crate) fn classify_request_error(err: &reqwest::Error) -> ProbeError {
    if err.is_timeout() {
        return ProbeError::Timeout;
    }
    if err.is_builder() {
        return ProbeError::Transport("invalid URL".to_string());
    }
    if err.is_connect() {
        if error_chain_contains(err, "dns error") || error_chain_contains(err, "failed to lookup") {
            return ProbeError::Transport("host not found".to_string());
        }
        return ProbeError::ConnectionRefused;
    }
    if err.is_decode() || err.is_body() {
        return ProbeError::BadResponse;
    }
    debug!("Unclassified request error: {}", err);
    ProbeError::Transport("request failed".to_string())
}

fn error_chain_contains(err: &reqwest::Error, needle: &str) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(inner) = source {
        if inner.to_string().to_lowercase().contains(needle) {
            return true;
        }
        source = inner.source();
    }
    false
}

/// Builds the probe for a transport kind from a config
pub trait ProbeFactory: Send + Sync {
    fn build(&self, kind: ProbeKind, config: &TunnelConfig) -> Result<Arc<dyn ConnectionProbe>>;
}

/// Default factory: real HTTP probes sharing one client
#[derive(Clone)]
pub struct HttpProbeFactory {
    client: Client,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpProbeFactory {
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let client = create_probe_client()?;
        Ok(Self { client, tokens })
    }

    pub fn with_client(client: Client, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { client, tokens }
    }
}

impl ProbeFactory for HttpProbeFactory {
    fn build(&self, kind: ProbeKind, config: &TunnelConfig) -> Result<Arc<dyn ConnectionProbe>> {
        let timeout = config.connection_timeout();
        let probe: Arc<dyn ConnectionProbe> = match kind {
            ProbeKind::LocalRuntime => Arc::new(LocalRuntimeProbe::new(
                self.client.clone(),
                config.runtime_base_url(),
                timeout,
            )),
            ProbeKind::CloudRelay => Arc::new(CloudRelayProbe::new(
                self.client.clone(),
                config.cloud_base_url(),
                timeout,
                self.tokens.clone(),
            )),
            ProbeKind::TunnelPublisher => {
                let base_url = config.publisher_base_url();
                if !points_at_loopback(&base_url) {
                    warn!(
                        "Tunnel publisher URL {} is not a loopback address; the control API is normally local",
                        base_url
                    );
                }
                Arc::new(TunnelPublisherProbe::new(
                    self.client.clone(),
                    base_url,
                    timeout,
                ))
            }
        };
        Ok(probe)
    }
}

fn points_at_loopback(url: &str) -> bool {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(is_loopback_address))
        .unwrap_or(false)
}

/// Create the HTTP client shared by all probes.
///
/// Per-request timeouts come from the config, so the client itself carries
/// none.
pub fn create_probe_client() -> Result<Client> {
    Client::builder()
        .user_agent(concat!("llm-tunnel/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::ProbeSetup(format!("Failed to build HTTP client: {}", e)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;
    use tokio::net::TcpListener;

    /// Serve `router` on an ephemeral loopback port and return its base URL
    pub async fn spawn_server(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    /// Base URL of a loopback port with nothing listening on it
    pub async fn closed_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }
}
