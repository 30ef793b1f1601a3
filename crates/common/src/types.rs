// Common types for LLM Tunnel Manager

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transport kinds the manager knows how to probe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProbeKind {
    /// Local LLM runtime (Ollama API)
    #[serde(rename = "local")]
    LocalRuntime,
    /// Cloud relay bridging web clients to the desktop bridge
    #[serde(rename = "cloud")]
    CloudRelay,
    /// Desktop-only tunnel publisher control endpoint
    #[serde(rename = "tunnelPublisher")]
    TunnelPublisher,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 3] = [
        ProbeKind::LocalRuntime,
        ProbeKind::CloudRelay,
        ProbeKind::TunnelPublisher,
    ];

    /// Stable probe identifier used as the status map key
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::LocalRuntime => "local",
            ProbeKind::CloudRelay => "cloud",
            ProbeKind::TunnelPublisher => "tunnelPublisher",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single probe check.
///
/// A connected status never carries an error and a disconnected one always
/// does. [`ConnectionStatus::connected`] and [`ConnectionStatus::failed`]
/// uphold this, deserialization rejects records that break it, and code
/// filling the fields by hand must keep it too.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "StatusRecord")]
pub struct ConnectionStatus {
    pub name: String,
    pub is_connected: bool,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Models advertised by the local runtime (empty for other probes)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub models: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl ConnectionStatus {
    pub fn connected(
        kind: ProbeKind,
        endpoint: impl Into<String>,
        latency_ms: Option<f64>,
        version: Option<String>,
        models: Vec<String>,
    ) -> Self {
        Self {
            name: kind.as_str().to_string(),
            is_connected: true,
            endpoint: endpoint.into(),
            latency_ms,
            version,
            error: None,
            models,
            checked_at: Utc::now(),
        }
    }

    pub fn failed(kind: ProbeKind, endpoint: impl Into<String>, error: impl fmt::Display) -> Self {
        Self {
            name: kind.as_str().to_string(),
            is_connected: false,
            endpoint: endpoint.into(),
            latency_ms: None,
            version: None,
            error: Some(error.to_string()),
            models: Vec::new(),
            checked_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> Option<ProbeKind> {
        ProbeKind::from_name(&self.name)
    }
}

/// Wire form of [`ConnectionStatus`], checked before it becomes one
#[derive(Deserialize)]
struct StatusRecord {
    name: String,
    is_connected: bool,
    endpoint: String,
    latency_ms: Option<f64>,
    version: Option<String>,
    error: Option<String>,
    #[serde(default)]
    models: Vec<String>,
    checked_at: DateTime<Utc>,
}

impl TryFrom<StatusRecord> for ConnectionStatus {
    type Error = String;

    fn try_from(record: StatusRecord) -> Result<Self, Self::Error> {
        match (record.is_connected, &record.error) {
            (true, Some(error)) => {
                return Err(format!(
                    "status '{}' is connected but reports error '{}'",
                    record.name, error
                ))
            }
            (false, None) => {
                return Err(format!(
                    "status '{}' is disconnected without an error",
                    record.name
                ))
            }
            _ => {}
        }

        Ok(Self {
            name: record.name,
            is_connected: record.is_connected,
            endpoint: record.endpoint,
            latency_ms: record.latency_ms,
            version: record.version,
            error: record.error,
            models: record.models,
            checked_at: record.checked_at,
        })
    }
}

/// Status map keyed by probe name
pub type StatusMap = BTreeMap<String, ConnectionStatus>;

/// Aggregated connectivity over all enabled probes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverallState {
    /// Every enabled probe is connected
    Connected,
    /// Some, but not all, enabled probes are connected
    Degraded,
    /// No probe is connected, or none is enabled
    Disconnected,
}

impl OverallState {
    pub fn from_statuses(statuses: &StatusMap) -> Self {
        let total = statuses.len();
        let connected = statuses.values().filter(|s| s.is_connected).count();

        if total == 0 || connected == 0 {
            OverallState::Disconnected
        } else if connected == total {
            OverallState::Connected
        } else {
            OverallState::Degraded
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, OverallState::Connected)
    }
}

impl fmt::Display for OverallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            OverallState::Connected => "connected",
            OverallState::Degraded => "degraded",
            OverallState::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Lifecycle phase of the tunnel manager
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ManagerPhase {
    Uninitialized,
    Connecting,
    Connected,
    Degraded,
    Disconnected,
}

impl From<OverallState> for ManagerPhase {
    fn from(state: OverallState) -> Self {
        match state {
            OverallState::Connected => ManagerPhase::Connected,
            OverallState::Degraded => ManagerPhase::Degraded,
            OverallState::Disconnected => ManagerPhase::Disconnected,
        }
    }
}

/// Immutable result of one completed health-check pass
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    /// Sequence number of the pass, starting at 1
    pub pass: u64,
    pub state: OverallState,
    pub statuses: Arc<StatusMap>,
    pub completed_at: DateTime<Utc>,
}
