// Desktop tunnel publisher probe

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::Instant;

use llm_tunnel_common::{ProbeError, ProbeKind};

use super::{classify_request_error, ConnectionProbe, ProbeSuccess};

/// Answer of the publisher control API
#[derive(Debug, Deserialize)]
struct TunnelStatusResponse {
    active: bool,
    #[serde(default)]
    public_url: Option<String>,
}

/// Asks the local bridge whether it currently publishes a tunnel
pub struct TunnelPublisherProbe {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl TunnelPublisherProbe {
    pub fn new(client: Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }
}

#[async_trait]
impl ConnectionProbe for TunnelPublisherProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::TunnelPublisher
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self) -> Result<ProbeSuccess, ProbeError> {
        let url = format!("{}/api/tunnel/status", self.base_url);
        let started = Instant::now();

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| match classify_request_error(&e) {
                ProbeError::ConnectionRefused => ProbeError::PublisherNotRunning,
                other => other,
            })?;
        let latency = started.elapsed();

        match response.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(ProbeError::PublisherUnsupported),
            other => return Err(ProbeError::HttpStatus(other.as_u16())),
        }

        let status: TunnelStatusResponse = response
            .json()
            .await
            .map_err(|_| ProbeError::BadResponse)?;

        match status.public_url {
            Some(public_url) if status.active && !public_url.is_empty() => Ok(ProbeSuccess {
                latency: Some(latency),
                endpoint: Some(public_url),
                ..Default::default()
            }),
            _ => Err(ProbeError::NoActiveTunnel),
        }
    }
}
