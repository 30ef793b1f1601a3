// Local runtime probe (Ollama-compatible API)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use llm_tunnel_common::{ProbeError, ProbeKind};

use super::{classify_request_error, ConnectionProbe, ProbeSuccess};

#[derive(Deserialize)]
struct VersionResponse {
    version: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
}

/// Checks `GET /api/version` on the local runtime, then lists models
pub struct LocalRuntimeProbe {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl LocalRuntimeProbe {
    pub fn new(client: Client, base_url: String, timeout: Duration) -> Self {
        Self {
            client,
            base_url,
            timeout,
        }
    }

    /// Best-effort model listing; failures leave the list empty
    async fn fetch_models(&self, budget: Duration) -> Vec<String> {
        let url = format!("{}/api/tags", self.base_url);
        let request = async {
            let response = self.client.get(&url).timeout(budget).send().await?;
            response.error_for_status()?.json::<TagsResponse>().await
        };

        match tokio::time::timeout(budget, request).await {
            Ok(Ok(tags)) => tags.models.into_iter().map(|m| m.name).collect(),
            Ok(Err(e)) => {
                warn!("Failed to fetch models from {}: {}", url, e);
                Vec::new()
            }
            Err(_) => {
                debug!("Model listing from {} ran out of time", url);
                Vec::new()
            }
        }
    }
}

/// The runtime reports only timeout, refused or bad response; anything
/// that kept the request from reaching the runtime counts as refused
fn runtime_error(err: &reqwest::Error) -> ProbeError {
    match classify_request_error(err) {
        ProbeError::Timeout => ProbeError::Timeout,
        ProbeError::BadResponse => ProbeError::BadResponse,
        ProbeError::Transport(_) if !(err.is_connect() || err.is_builder()) => {
            ProbeError::BadResponse
        }
        _ => ProbeError::ConnectionRefused,
    }
}

#[async_trait]
impl ConnectionProbe for LocalRuntimeProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::LocalRuntime
    }

    fn endpoint(&self) -> String {
        self.base_url.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self) -> Result<ProbeSuccess, ProbeError> {
        let url = format!("{}/api/version", self.base_url);
        let started = Instant::now();

        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| runtime_error(&e))?;

        if response.status() != StatusCode::OK {
            debug!("{} answered {}", url, response.status());
            return Err(ProbeError::BadResponse);
        }

        let body: VersionResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ProbeError::Timeout
            } else {
                ProbeError::BadResponse
            }
        })?;
        let latency = started.elapsed();

        let remaining = self.timeout.saturating_sub(started.elapsed());
        let models = self.fetch_models(remaining).await;

        Ok(ProbeSuccess {
            latency: Some(latency),
            version: Some(body.version),
            models,
            endpoint: None,
        })
    }
}
