// Error types for LLM Tunnel Manager

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration rejected: {0}")]
    ConfigValidation(#[from] ConfigValidationError),

    #[error("Probe setup failed: {0}")]
    ProbeSetup(String),

    #[error("Manager is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, Error>;

/// A numeric field of a `TunnelConfig` outside its allowed range.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    #[error("runtime_port must be between 1 and 65535 (got {0})")]
    RuntimePort(u32),

    #[error("connection_timeout_secs must be between 1 and 300 (got {0})")]
    ConnectionTimeout(u64),

    #[error("health_check_interval_secs must be between 5 and 3600 (got {0})")]
    HealthCheckInterval(u64),
}

/// Broad category of a probe failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeErrorKind {
    Timeout,
    Auth,
    Unavailable,
    Transport,
}

/// Failure of a single connectivity check.
///
/// Probe errors are data: the manager folds them into
/// `ConnectionStatus::error` through their `Display` text and never
/// returns them to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("timeout")]
    Timeout,

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("authentication rejected")]
    AuthRejected,

    #[error("no local bridge connected")]
    NoBridge,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("bad response")]
    BadResponse,

    #[error("HTTP {0}")]
    HttpStatus(u16),

    #[error("{0}")]
    Transport(String),

    #[error("tunnel publisher not running")]
    PublisherNotRunning,

    #[error("no active tunnel")]
    NoActiveTunnel,

    #[error("tunnel publisher control API unavailable")]
    PublisherUnsupported,
}

impl ProbeError {
    pub fn kind(&self) -> ProbeErrorKind {
        match self {
            ProbeError::Timeout => ProbeErrorKind::Timeout,
            ProbeError::NotAuthenticated | ProbeError::AuthRejected => ProbeErrorKind::Auth,
            ProbeError::NoBridge
            | ProbeError::PublisherNotRunning
            | ProbeError::NoActiveTunnel
            | ProbeError::PublisherUnsupported => ProbeErrorKind::Unavailable,
            ProbeError::ConnectionRefused
            | ProbeError::BadResponse
            | ProbeError::HttpStatus(_)
            | ProbeError::Transport(_) => ProbeErrorKind::Transport,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_error_messages() {
        assert_eq!(ProbeError::Timeout.to_string(), "timeout");
        assert_eq!(ProbeError::NotAuthenticated.to_string(), "not authenticated");
        assert_eq!(ProbeError::NoBridge.to_string(), "no local bridge connected");
        assert_eq!(ProbeError::ConnectionRefused.to_string(), "connection refused");
        assert_eq!(ProbeError::BadResponse.to_string(), "bad response");
        assert_eq!(ProbeError::HttpStatus(502).to_string(), "HTTP 502");
    }

    #[test]
    fn test_probe_error_kind() {
        assert_eq!(ProbeError::NoBridge.kind(), ProbeErrorKind::Unavailable);
        assert_eq!(ProbeError::AuthRejected.kind(), ProbeErrorKind::Auth);
        assert_eq!(
            ProbeError::Transport("dns error".to_string()).kind(),
            ProbeErrorKind::Transport
        );
    }

    #[test]
    fn test_config_error_wraps() {
        let err: Error = ConfigValidationError::RuntimePort(0).into();
        assert!(err.to_string().contains("runtime_port"));
    }
}
