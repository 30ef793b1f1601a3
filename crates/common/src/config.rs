// Configuration structures for LLM Tunnel Manager

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigValidationError;
use crate::network::{format_host_port, trim_base_url};
use crate::types::ProbeKind;

pub const MIN_TIMEOUT_SECS: u64 = 1;
pub const MAX_TIMEOUT_SECS: u64 = 300;
pub const MIN_INTERVAL_SECS: u64 = 5;
pub const MAX_INTERVAL_SECS: u64 = 3600;

/// Desired state of every transport.
///
/// Treated as an immutable value: updates replace the whole config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Probe the local LLM runtime
    #[serde(default = "default_enable_local_runtime")]
    pub enable_local_runtime: bool,
    /// Runtime host (optionally prefixed with http:// or https://)
    #[serde(default = "default_runtime_host")]
    pub runtime_host: String,
    /// Runtime port, 1-65535
    #[serde(default = "default_runtime_port")]
    pub runtime_port: u32,

    /// Probe the cloud relay
    #[serde(default)]
    pub enable_cloud_proxy: bool,
    /// Absolute base URL of the cloud relay
    #[serde(default = "default_cloud_proxy_url")]
    pub cloud_proxy_url: String,

    /// Probe the desktop tunnel publisher (ignored without the capability)
    #[serde(default)]
    pub enable_tunnel_publisher: bool,
    /// Base URL of the tunnel publisher control API
    #[serde(default = "default_tunnel_publisher_url")]
    pub tunnel_publisher_url: String,

    /// Per-check timeout in seconds, 1-300
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
    /// Seconds between periodic passes, 5-3600
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval_secs: u64,
}

// Default value functions
fn default_enable_local_runtime() -> bool {
    true
}

fn default_runtime_host() -> String {
    "localhost".to_string()
}

fn default_runtime_port() -> u32 {
    11434 // Ollama default
}

fn default_cloud_proxy_url() -> String {
    "https://app.cloudtolocalllm.online".to_string()
}

fn default_tunnel_publisher_url() -> String {
    "http://127.0.0.1:3025".to_string()
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_health_check_interval() -> u64 {
    30
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enable_local_runtime: default_enable_local_runtime(),
            runtime_host: default_runtime_host(),
            runtime_port: default_runtime_port(),
            enable_cloud_proxy: false,
            cloud_proxy_url: default_cloud_proxy_url(),
            enable_tunnel_publisher: false,
            tunnel_publisher_url: default_tunnel_publisher_url(),
            connection_timeout_secs: default_connection_timeout(),
            health_check_interval_secs: default_health_check_interval(),
        }
    }
}

/// Platform features that gate optional probes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// A desktop tunnel publisher can exist on this target
    pub tunnel_publisher: bool,
}

impl Capabilities {
    /// Capabilities of the current build target
    pub fn detect() -> Self {
        Self {
            tunnel_publisher: cfg!(any(
                target_os = "linux",
                target_os = "macos",
                target_os = "windows"
            )),
        }
    }

    pub fn none() -> Self {
        Self {
            tunnel_publisher: false,
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::detect()
    }
}

impl TunnelConfig {
    /// Check every numeric field against its range
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !(1..=65535).contains(&self.runtime_port) {
            return Err(ConfigValidationError::RuntimePort(self.runtime_port));
        }
        if !(MIN_TIMEOUT_SECS..=MAX_TIMEOUT_SECS).contains(&self.connection_timeout_secs) {
            return Err(ConfigValidationError::ConnectionTimeout(
                self.connection_timeout_secs,
            ));
        }
        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&self.health_check_interval_secs) {
            return Err(ConfigValidationError::HealthCheckInterval(
                self.health_check_interval_secs,
            ));
        }
        Ok(())
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// Whether the given probe is switched on
    pub fn is_enabled(&self, kind: ProbeKind, capabilities: Capabilities) -> bool {
        match kind {
            ProbeKind::LocalRuntime => self.enable_local_runtime,
            ProbeKind::CloudRelay => self.enable_cloud_proxy,
            ProbeKind::TunnelPublisher => {
                self.enable_tunnel_publisher && capabilities.tunnel_publisher
            }
        }
    }

    /// Probes switched on by this config, in stable order
    pub fn enabled_probes(&self, capabilities: Capabilities) -> Vec<ProbeKind> {
        ProbeKind::ALL
            .into_iter()
            .filter(|kind| self.is_enabled(*kind, capabilities))
            .collect()
    }

    /// Base URL of the local runtime, e.g. `http://localhost:11434`
    pub fn runtime_base_url(&self) -> String {
        let host = self.runtime_host.trim();
        for scheme in ["http://", "https://"] {
            if let Some(rest) = host.strip_prefix(scheme) {
                return format!(
                    "{}{}",
                    scheme,
                    format_host_port(rest.trim_end_matches('/'), self.runtime_port)
                );
            }
        }
        format!("http://{}", format_host_port(host, self.runtime_port))
    }

    pub fn cloud_base_url(&self) -> String {
        trim_base_url(&self.cloud_proxy_url)
    }

    pub fn publisher_base_url(&self) -> String {
        trim_base_url(&self.tunnel_publisher_url)
    }

    /// Endpoint the given probe talks to under this config
    pub fn endpoint_for(&self, kind: ProbeKind) -> String {
        match kind {
            ProbeKind::LocalRuntime => self.runtime_base_url(),
            ProbeKind::CloudRelay => self.cloud_base_url(),
            ProbeKind::TunnelPublisher => self.publisher_base_url(),
        }
    }

    /// True when `other` points the given probe somewhere else
    pub fn endpoint_changed(&self, other: &TunnelConfig, kind: ProbeKind) -> bool {
        match kind {
            ProbeKind::LocalRuntime => {
                self.runtime_host != other.runtime_host || self.runtime_port != other.runtime_port
            }
            ProbeKind::CloudRelay => self.cloud_proxy_url != other.cloud_proxy_url,
            ProbeKind::TunnelPublisher => self.tunnel_publisher_url != other.tunnel_publisher_url,
        }
    }
}
