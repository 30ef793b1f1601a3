// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 LLM Tunnel Manager Contributors

// LLM Tunnel Manager - Daemon Library
// Connection manager for the local runtime, cloud relay and tunnel publisher

pub mod auth;
pub mod manager;
pub mod probe;
pub mod status_publisher;
pub mod storage;

pub use auth::{FileTokenProvider, StaticTokenProvider, TokenProvider};
pub use manager::TunnelManager;
pub use probe::{run_probe, ConnectionProbe, HttpProbeFactory, ProbeFactory, ProbeSuccess};
pub use status_publisher::{StatusPublisher, Subscription, SubscriptionId};
pub use storage::{ConfigStore, MemoryConfigStore, TomlConfigStore};
