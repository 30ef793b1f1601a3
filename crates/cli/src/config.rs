// LLM Tunnel Manager - CLI Config Module
// Maps `config set` keys onto TunnelConfig fields

use std::fmt::Display;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};

use llm_tunnel_common::TunnelConfig;

/// Keys accepted by `llm-tunnel config set`
pub const SETTING_KEYS: &[&str] = &[
    "enable_local_runtime",
    "runtime_host",
    "runtime_port",
    "enable_cloud_proxy",
    "cloud_proxy_url",
    "enable_tunnel_publisher",
    "tunnel_publisher_url",
    "connection_timeout_secs",
    "health_check_interval_secs",
];

/// Set a single field from its textual value. Range checks are left to
/// `TunnelConfig::validate`.
pub fn apply_setting(config: &mut TunnelConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "enable_local_runtime" => config.enable_local_runtime = parse_bool(key, value)?,
        "runtime_host" => config.runtime_host = parse_text(key, value)?,
        "runtime_port" => config.runtime_port = parse_number(key, value)?,
        "enable_cloud_proxy" => config.enable_cloud_proxy = parse_bool(key, value)?,
        "cloud_proxy_url" => config.cloud_proxy_url = parse_text(key, value)?,
        "enable_tunnel_publisher" => config.enable_tunnel_publisher = parse_bool(key, value)?,
        "tunnel_publisher_url" => config.tunnel_publisher_url = parse_text(key, value)?,
        "connection_timeout_secs" => config.connection_timeout_secs = parse_number(key, value)?,
        "health_check_interval_secs" => {
            config.health_check_interval_secs = parse_number(key, value)?
        }
        other => bail!(
            "Unknown setting '{}'. Valid keys: {}",
            other,
            SETTING_KEYS.join(", ")
        ),
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => bail!("{} expects true or false, got '{}'", key, value),
    }
}

fn parse_number<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow!("{} expects a number, got '{}': {}", key, value, e))
}

fn parse_text(key: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        bail!("{} must not be empty", key);
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_each_kind_of_setting() {
        let mut config = TunnelConfig::default();

        apply_setting(&mut config, "enable_cloud_proxy", "yes").unwrap();
        apply_setting(&mut config, "runtime_port", "11500").unwrap();
        apply_setting(&mut config, "cloud_proxy_url", " https://relay.example ").unwrap();
        apply_setting(&mut config, "enable_local_runtime", "off").unwrap();

        assert!(config.enable_cloud_proxy);
        assert!(!config.enable_local_runtime);
        assert_eq!(config.runtime_port, 11500);
        assert_eq!(config.cloud_proxy_url, "https://relay.example");
    }

    #[test]
    fn test_out_of_range_values_parse() {
        // Rejected later by validation, with the manager's error message
        let mut config = TunnelConfig::default();
        apply_setting(&mut config, "runtime_port", "70000").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_input() {
        let mut config = TunnelConfig::default();
        assert!(apply_setting(&mut config, "runtime_port", "abc").is_err());
        assert!(apply_setting(&mut config, "runtime_port", "-1").is_err());
        assert!(apply_setting(&mut config, "enable_cloud_proxy", "maybe").is_err());
        assert!(apply_setting(&mut config, "runtime_host", "  ").is_err());

        let err = apply_setting(&mut config, "bogus", "1").unwrap_err();
        assert!(err.to_string().contains("runtime_port"));
        assert_eq!(config, TunnelConfig::default());
    }
}
