// Cloud relay probe

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use llm_tunnel_common::{ProbeError, ProbeKind};

use super::{classify_request_error, ConnectionProbe, ProbeSuccess};
use crate::auth::TokenProvider;

#[derive(Deserialize)]
struct HealthResponse {
    #[serde(default)]
    version: Option<String>,
}

/// Checks `GET {cloud_proxy_url}/api/health` with the user's bearer token
pub struct CloudRelayProbe {
    client: Client,
    base_url: String,
    timeout: Duration,
    tokens: Arc<dyn TokenProvider>,
}

impl CloudRelayProbe {
    pub fn new(
        client: Client,
        base_url: String,
        timeout: Duration,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            client,
            base_url,
            timeout,
            tokens,
        }
    }
}

#[async_trait]
impl ConnectionProbe for CloudRelayProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::CloudRelay
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self) -> Result<ProbeSuccess, ProbeError> {
        // No token, no request
        let token = self
            .tokens
            .access_token()
            .await
            .ok_or(ProbeError::NotAuthenticated)?;

        let url = format!("{}/api/health", self.base_url);
        let started = Instant::now();

        let response = self
            .client
            .get(&url)
            .bearer_auth(token.as_str())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify_request_error(&e))?;
        let latency = started.elapsed();

        match response.status() {
            StatusCode::OK => {
                // The body is informational; an empty or non-JSON body is still healthy
                let version = response
                    .json::<HealthResponse>()
                    .await
                    .ok()
                    .and_then(|h| h.version);
                Ok(ProbeSuccess {
                    latency: Some(latency),
                    version,
                    ..Default::default()
                })
            }
            StatusCode::SERVICE_UNAVAILABLE => Err(ProbeError::NoBridge),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProbeError::AuthRejected),
            other => {
                debug!("{} answered {}", url, other);
                Err(ProbeError::HttpStatus(other.as_u16()))
            }
        }
    }
}
