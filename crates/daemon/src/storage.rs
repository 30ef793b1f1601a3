// LLM Tunnel Manager - Config Storage Module
// Persists the tunnel configuration between sessions

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing::{debug, info};

use llm_tunnel_common::TunnelConfig;

/// Persistence collaborator for `TunnelConfig`.
///
/// The manager only calls `load` at startup and `save` after an accepted
/// update; the medium is up to the implementation.
pub trait ConfigStore: Send + Sync {
    /// Load the stored config, `Ok(None)` when nothing was saved yet
    fn load(&self) -> Result<Option<TunnelConfig>>;

    fn save(&self, config: &TunnelConfig) -> Result<()>;
}

/// TOML file store, by default `<config_dir>/llm-tunnel/tunnel.toml`
#[derive(Debug, Clone)]
pub struct TomlConfigStore {
    path: PathBuf,
}

impl TomlConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the default per-user location
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Self::default_path()?))
    }

    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("llm-tunnel").join("tunnel.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for TomlConfigStore {
    fn load(&self) -> Result<Option<TunnelConfig>> {
        if !self.path.exists() {
            debug!("No tunnel configuration at {}", self.path.display());
            return Ok(None);
        }

        let contents =
            fs::read_to_string(&self.path).context("Failed to read tunnel configuration")?;

        let config: TunnelConfig =
            toml::from_str(&contents).context("Failed to parse tunnel configuration")?;

        info!("Loaded tunnel configuration from: {}", self.path.display());
        Ok(Some(config))
    }

    fn save(&self, config: &TunnelConfig) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create configuration directory")?;
        }

        let contents =
            toml::to_string_pretty(config).context("Failed to serialize tunnel configuration")?;

        fs::write(&self.path, contents).context("Failed to write tunnel configuration")?;

        // Set restrictive permissions on config file (Unix only)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&self.path, permissions)
                .context("Failed to set config file permissions")?;
        }

        info!("Saved tunnel configuration to: {}", self.path.display());
        Ok(())
    }
}

/// In-process store, used by embedders without a filesystem and by tests
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    config: Mutex<Option<TunnelConfig>>,
    fail_load: bool,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TunnelConfig) -> Self {
        Self {
            config: Mutex::new(Some(config)),
            fail_load: false,
        }
    }

    /// A store whose `load` always errors
    pub fn failing() -> Self {
        Self {
            config: Mutex::new(None),
            fail_load: true,
        }
    }

    /// Last saved config
    pub fn saved(&self) -> Option<TunnelConfig> {
        self.config.lock().ok().and_then(|c| c.clone())
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<Option<TunnelConfig>> {
        if self.fail_load {
            anyhow::bail!("Config store unavailable");
        }
        let guard = self
            .config
            .lock()
            .map_err(|_| anyhow::anyhow!("Config store lock poisoned"))?;
        Ok(guard.clone())
    }

    fn save(&self, config: &TunnelConfig) -> Result<()> {
        let mut guard = self
            .config
            .lock()
            .map_err(|_| anyhow::anyhow!("Config store lock poisoned"))?;
        *guard = Some(config.clone());
        Ok(())
    }
}
