//! CLI configuration.
//!
//! Stored as TOML, by default at `~/.config/chunkdav/config.toml`. Every
//! field is optional; command-line flags override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chunkdav_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_RETRIES, UploadConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    /// Directory backing the filesystem store.
    #[serde(default = "default_store_root")]
    pub store_root: PathBuf,

    /// Account the files are uploaded for.
    #[serde(default = "default_user")]
    pub user: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_skip")]
    pub skip_if_same_size: bool,

    #[serde(default = "default_pause_timeout_secs")]
    pub pause_timeout_secs: u64,
}

fn default_store_root() -> PathBuf {
    PathBuf::from("chunkdav-store")
}

fn default_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "anonymous".into())
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_skip() -> bool {
    true
}

fn default_pause_timeout_secs() -> u64 {
    60 * 60
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            store_root: default_store_root(),
            user: default_user(),
            chunk_size: default_chunk_size(),
            max_retries: default_max_retries(),
            skip_if_same_size: default_skip(),
            pause_timeout_secs: default_pause_timeout_secs(),
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub store_root: Option<PathBuf>,
    pub user: Option<String>,
    pub chunk_size: Option<u64>,
    pub max_retries: Option<u32>,
    pub no_skip: bool,
}

impl CliConfig {
    /// Loads `path`, which must exist. Without a path the default location
    /// is used if present, otherwise defaults.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_file(path),
            None => {
                let path = default_path();
                if path.exists() {
                    Self::load_file(&path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {e}", path.display()))?;
        let config: CliConfig = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn apply(mut self, overrides: &Overrides) -> Self {
        if let Some(root) = &overrides.store_root {
            self.store_root = root.clone();
        }
        if let Some(user) = &overrides.user {
            self.user = user.clone();
        }
        if let Some(size) = overrides.chunk_size {
            self.chunk_size = size;
        }
        if let Some(retries) = overrides.max_retries {
            self.max_retries = retries;
        }
        if overrides.no_skip {
            self.skip_if_same_size = false;
        }
        self
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig::new()
            .with_chunk_size(self.chunk_size)
            .with_max_retries(self.max_retries)
            .with_skip_if_same_size(self.skip_if_same_size)
            .with_pause_timeout(Duration::from_secs(self.pause_timeout_secs))
    }
}

/// Default configuration file path.
pub fn default_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home)
        .join(".config")
        .join("chunkdav")
        .join("config.toml")
}
