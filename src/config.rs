use std::path::{Path, PathBuf};
use std::time::Duration;

use color_eyre::eyre::{Context, OptionExt, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    database: String,
    pub spotify: SpotifyConfig,
    pub rate_limit: RateLimitConfig,
    pub discovery: DiscoveryConfig,
    pub scan: ScanConfig,
    pub tasks: TasksConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotifyConfig {
    pub api_base_url: String,
    pub accounts_url: String,
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Used when a 429 response carries no `Retry-After` header
    #[serde(with = "duration_str")]
    pub default_retry_after: Duration,
    /// Added on top of the server supplied delay
    #[serde(with = "duration_str")]
    pub extra_delay: Duration,
    /// Give up after this many consecutive 429s. Unset means retry forever.
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub keywords: Vec<String>,
    pub max_per_keyword: usize,
    pub max_total: usize,
    pub page_size: u32,
    #[serde(with = "duration_str")]
    pub page_delay: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Artist hint for tracks without an artist name
    pub default_artist_hint: Option<String>,
    pub search_limit: u32,
    #[serde(with = "duration_str")]
    pub page_delay: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksConfig {
    pub worker_pool_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: "~/.local/share/playlist-watcher/playlist-watcher.db".to_string(),
            spotify: SpotifyConfig::default(),
            rate_limit: RateLimitConfig::default(),
            discovery: DiscoveryConfig::default(),
            scan: ScanConfig::default(),
            tasks: TasksConfig::default(),
        }
    }
}

impl Default for SpotifyConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.spotify.com/v1/".to_string(),
            accounts_url: "https://accounts.spotify.com/api/token".to_string(),
            request_timeout: Duration::from_secs(20),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_retry_after: Duration::from_secs(5),
            extra_delay: Duration::from_secs(1),
            max_retries: None,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            keywords: [
                "chill", "indie", "rock", "pop", "hip hop", "electro", "house", "techno", "lofi",
                "jazz", "workout", "party", "new music", "discover", "playlist",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            max_per_keyword: 200,
            max_total: 1000,
            page_size: 50,
            page_delay: Duration::from_millis(400),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            default_artist_hint: None,
            search_limit: 50,
            page_delay: Duration::from_millis(400),
        }
    }
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 2,
        }
    }
}

impl Config {
    /// Load config from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .wrap_err(format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .wrap_err(format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|path| path.join("playlist-watcher").join("config.toml"))
    }

    /// Load the default config file, falling back to built-in defaults when it doesn't exist
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                log::debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Write the default config to the default location, unless a file is already there
    pub fn create_default() -> Result<PathBuf> {
        let path = Self::config_path().ok_or_eyre("No config directory on this platform")?;
        if path.exists() {
            log::info!("Config already exists at: {}", path.display());
            return Ok(path);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .wrap_err(format!("Failed to create config directory: {}", parent.display()))?;
        }
        let contents =
            toml::to_string_pretty(&Self::default()).wrap_err("Failed to serialize config")?;
        std::fs::write(&path, contents)
            .wrap_err(format!("Failed to write config file: {}", path.display()))?;
        Ok(path)
    }

    /// Expand ~ to home directory
    fn expand_path(&self, path: &str) -> PathBuf {
        if let Some(rest) = path.strip_prefix("~/")
            && let Some(home) = dirs::home_dir()
        {
            return home.join(rest);
        }
        PathBuf::from(path)
    }

    pub fn database_path(&self) -> PathBuf {
        self.expand_path(&self.database)
    }
}

/// Durations written the human way in config files, e.g. `"400ms"` or `"5s"`.
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
