//! CLI configuration.
//!
//! Stored as JSON:
//! - Linux/macOS: `$XDG_CONFIG_HOME/synthlift/config.json`, else `~/.config/synthlift/config.json`
//! - Windows: `%APPDATA%\synthlift\config.json`

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use synthlift_transfer::{DEFAULT_API_VERSION, IDLE_TIMEOUT};
use synthlift_uploader::DEFAULT_PARALLELISM;

/// Environment variable that replaces the stored access token.
pub const ACCESS_TOKEN_ENV: &str = "SYNTHLIFT_ACCESS_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Base URL of the media service.
    #[serde(default)]
    pub service_url: String,

    #[serde(default)]
    pub access_token: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Number of parallel upload lanes.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,

    /// Automatic resume passes after a session with failures.
    #[serde(default)]
    pub resume_attempts: u32,

    /// Seconds a request may stall before it is abandoned.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.into()
}

fn default_parallelism() -> usize {
    DEFAULT_PARALLELISM
}

fn default_timeout_secs() -> u64 {
    IDLE_TIMEOUT.as_secs()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            service_url: String::new(),
            access_token: String::new(),
            api_version: default_api_version(),
            parallelism: default_parallelism(),
            resume_attempts: 0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl CliConfig {
    /// Loads configuration from `path`.
    ///
    /// A missing file yields defaults; so does a file that fails to parse,
    /// after a warning.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str(&content) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config, using defaults"
                );
                Ok(Self::default())
            }
        }
    }

    /// Writes configuration to `path` as pretty JSON, readable by the owner only.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        set_permissions_0600(path);

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Replaces the access token with a non-empty override.
    pub fn apply_token_override(&mut self, token: Option<String>) {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.access_token = token;
        }
    }
}

fn set_permissions_0600(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

/// Default location of the config file.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
    Ok(config_base_dir()?.join("synthlift").join("config.json"))
}

fn config_base_dir() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")
            .map_err(|_| anyhow::anyhow!("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata))
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(xdg));
        }
        let home = std::env::var_os("HOME")
            .ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
        Ok(PathBuf::from(home).join(".config"))
    }
}
