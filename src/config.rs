use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::warn;

use crate::extensions::DEFAULT_USER_AGENT;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
    pub bridge: BridgeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Root of extension scripts, settings and saved data. `~` is expanded.
    pub data_dir: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Sent when an extension does not set its own `User-Agent`.
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// How long a bridge call waits for the host; 0 waits forever.
    pub timeout_secs: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.local/share/miru".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 30,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self { timeout_secs: 60 }
    }
}

impl RuntimeConfig {
    /// Get the config file path
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config"))
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
            })
            .join("miru")
            .join("config.toml")
    }

    /// Load config from the default location, or return defaults if not found
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from `path`. Unreadable or malformed files fall back to
    /// defaults.
    pub fn load_from(path: &Path) -> Self {
        let mut config = if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => config,
                    Err(e) => {
                        warn!(path = %path.display(), "failed to parse config: {e}");
                        Self::default()
                    }
                },
                Err(e) => {
                    warn!(path = %path.display(), "failed to read config: {e}");
                    Self::default()
                }
            }
        } else {
            Self::default()
        };

        config.validate();
        config
    }

    /// Validate and clamp config values to acceptable ranges
    pub fn validate(&mut self) {
        self.network.request_timeout_secs = self.network.request_timeout_secs.clamp(1, 600);

        // 0 keeps the "no deadline" meaning
        if self.bridge.timeout_secs > 3600 {
            self.bridge.timeout_secs = 3600;
        }

        if self.network.user_agent.trim().is_empty() {
            self.network.user_agent = DEFAULT_USER_AGENT.to_string();
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<(), String> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {}", e))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        fs::write(path, content).map_err(|e| format!("Failed to write config: {}", e))?;

        Ok(())
    }

    /// The data directory with `~` and environment variables expanded.
    pub fn data_dir(&self) -> PathBuf {
        match shellexpand::full(&self.general.data_dir) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(e) => {
                warn!("failed to expand data_dir: {e}");
                PathBuf::from(shellexpand::tilde(&self.general.data_dir).as_ref())
            }
        }
    }

    /// Directory scanned for `<package>.js` scripts.
    pub fn extensions_dir(&self) -> PathBuf {
        self.data_dir().join("extensions")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.network.request_timeout_secs)
    }

    /// Deadline applied to bridge calls, `None` when disabled.
    pub fn bridge_timeout(&self) -> Option<Duration> {
        match self.bridge.timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
