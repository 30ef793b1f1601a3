// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 LLM Tunnel Manager Contributors

// LLM Tunnel Manager - Common Library
// Shared types, configuration, and error taxonomy

pub mod config;
pub mod error;
pub mod network;
pub mod types;

pub use config::{Capabilities, TunnelConfig};
pub use error::{ConfigValidationError, Error, ProbeError, ProbeErrorKind, Result};
pub use network::{format_host_port, is_loopback_address, trim_base_url};
pub use types::{
    ConnectionStatus, ManagerPhase, OverallState, ProbeKind, StatusMap, StatusSnapshot,
};

// Re-export commonly used external types
pub use chrono::{DateTime, Utc};
