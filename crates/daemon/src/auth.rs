// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 LLM Tunnel Manager Contributors

// LLM Tunnel Manager - Authentication Module
// Supplies bearer tokens for the cloud relay probe

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Source of bearer tokens for the cloud relay.
///
/// Token acquisition and refresh live outside this crate; a provider only
/// reports the current token, or `None` when the user is not signed in.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Option<Zeroizing<String>>;
}

/// Obfuscate a token for logging (show only last 4 characters)
/// Example: "abc123def456" -> "********f456"
pub fn obfuscate_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() < 4 {
        "*".repeat(chars.len())
    } else {
        let mask_len = chars.len() - 4;
        let visible: String = chars[mask_len..].iter().collect();
        format!("{}{}", "*".repeat(mask_len), visible)
    }
}

/// Fixed token, or none at all
#[derive(Clone, Default)]
pub struct StaticTokenProvider {
    token: Option<Zeroizing<String>>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Some(Zeroizing::new(token.into())),
        }
    }

    pub fn unauthenticated() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Option<Zeroizing<String>> {
        self.token.clone()
    }
}

/// Token file as written by the desktop bridge
#[derive(Deserialize)]
struct TokenFile {
    access_token: Option<String>,
}

/// Reads the token from disk on every request so refreshed tokens are
/// picked up without restarting.
///
/// The file holds either the bare token or a JSON object with an
/// `access_token` field.
#[derive(Debug, Clone)]
pub struct FileTokenProvider {
    path: PathBuf,
}

impl FileTokenProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default token location: `<config_dir>/llm-tunnel/tokens.json`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("llm-tunnel").join("tokens.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Extract the token from file contents
fn parse_token(contents: &str) -> Option<Zeroizing<String>> {
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('{') {
        return match serde_json::from_str::<TokenFile>(trimmed) {
            Ok(file) => file
                .access_token
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .map(Zeroizing::new),
            Err(e) => {
                warn!("Token file is not valid JSON: {}", e);
                None
            }
        };
    }

    Some(Zeroizing::new(trimmed.to_string()))
}

async fn read_token(path: &Path) -> Result<Option<Zeroizing<String>>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = Zeroizing::new(
        tokio::fs::read_to_string(path)
            .await
            .context(format!("Failed to read token file {}", path.display()))?,
    );
    Ok(parse_token(&contents))
}

#[async_trait]
impl TokenProvider for FileTokenProvider {
    async fn access_token(&self) -> Option<Zeroizing<String>> {
        match read_token(&self.path).await {
            Ok(Some(token)) => {
                debug!("Using access token {}", obfuscate_token(&token));
                Some(token)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("{:#}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_obfuscate_token() {
        let token = "abc123de-f456-7890-1234-567890abcdef";
        let obfuscated = obfuscate_token(token);
        assert_eq!(obfuscated, "********************************cdef");
        assert_eq!(obfuscated.len(), token.len());

        assert_eq!(obfuscate_token("1234"), "1234");
        assert_eq!(obfuscate_token("abc"), "***");
    }

    #[test]
    fn test_parse_token_formats() {
        assert_eq!(parse_token("  plain-token\n").as_deref().map(String::as_str), Some("plain-token"));
        assert_eq!(
            parse_token(r#"{"access_token": "jwt.value", "refresh_token": "r"}"#)
                .as_deref()
                .map(String::as_str),
            Some("jwt.value")
        );
        assert!(parse_token("").is_none());
        assert!(parse_token(r#"{"access_token": ""}"#).is_none());
        assert!(parse_token("{not json").is_none());
    }

    #[tokio::test]
    async fn test_file_provider_reads_current_contents() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tokens.json");
        let provider = FileTokenProvider::new(&path);

        assert!(provider.access_token().await.is_none());

        std::fs::write(&path, "first").unwrap();
        assert_eq!(provider.access_token().await.unwrap().as_str(), "first");

        std::fs::write(&path, r#"{"access_token":"second"}"#).unwrap();
        assert_eq!(provider.access_token().await.unwrap().as_str(), "second");
    }

    #[tokio::test]
    async fn test_static_provider() {
        assert!(StaticTokenProvider::unauthenticated()
            .access_token()
            .await
            .is_none());
        assert_eq!(
            StaticTokenProvider::new("t").access_token().await.unwrap().as_str(),
            "t"
        );
    }
}
