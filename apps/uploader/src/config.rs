//! Uploader configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/drivelink/uploader.toml`
//! - Windows: `%APPDATA%/drivelink/uploader.toml`
//!
//! Access tokens are never written here; pass them with `--token` or
//! `DRIVELINK_ACCESS_TOKEN`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use drivelink_protocol::constants::{DEFAULT_API_BASE, DEFAULT_CHUNK_SIZE, DEFAULT_WS_BASE};
use drivelink_upload::UploadConfig;

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploaderConfig {
    /// Base URL of the HTTP API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Base URL of the WebSocket API.
    #[serde(default = "default_ws_base")]
    pub ws_base: String,

    /// Bytes per upload frame.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.into()
}

fn default_ws_base() -> String {
    DEFAULT_WS_BASE.into()
}

fn default_chunk_size() -> u32 {
    DEFAULT_CHUNK_SIZE
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            ws_base: default_ws_base(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl UploaderConfig {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = UploaderConfig::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Library configuration with an optional bearer token.
    pub fn to_upload_config(&self, access_token: Option<String>) -> UploadConfig {
        UploadConfig {
            api_base: self.api_base.clone(),
            ws_base: self.ws_base.clone(),
            chunk_size: self.chunk_size,
            access_token,
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("drivelink")
            .join("uploader.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("drivelink").join("uploader.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/drivelink/uploader.toml"))
    }
}
