// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 LLM Tunnel Manager Contributors

// Network utility functions

use std::net::{IpAddr, Ipv6Addr};

/// Check if a host address is a loopback address
/// Supports IPv4 (127.0.0.1, 127.x.x.x), IPv6 (::1), and hostname (localhost)
pub fn is_loopback_address(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = host.parse::<IpAddr>() {
        return ip.is_loopback();
    }

    false
}

/// Join host and port, bracketing bare IPv6 literals
pub fn format_host_port(host: &str, port: u32) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// Normalize a base URL so paths can be appended with `format!("{base}/api/..")`
pub fn trim_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
