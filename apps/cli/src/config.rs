//! Uploader configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/chunkup/config.toml`
//! - Windows: `%APPDATA%/chunkup/config.toml`
//!
//! A missing file means defaults. Command-line flags override file values.

use std::path::{Path, PathBuf};

use chunkup_http::{DEFAULT_BASE_URL, HttpConfig};
use chunkup_session::UploadConfig;
use chunkup_transfer::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENCY, HashAlgorithm};
use serde::{Deserialize, Serialize};

use crate::cli::Cli;

/// Uploader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the upload server.
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Maximum number of chunk transfers in flight.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,

    /// Per-request timeout in seconds (unset = no timeout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn default_server_url() -> String {
    DEFAULT_BASE_URL.into()
}

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            chunk_size: default_chunk_size(),
            max_concurrency: default_max_concurrency(),
            hash_algorithm: HashAlgorithm::default(),
            timeout_secs: None,
        }
    }
}

impl Config {
    /// Loads the configuration from `path`, or defaults if it does not exist.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Applies the flags given on the command line.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(url) = &cli.server_url {
            self.server_url = url.clone();
        }
        if let Some(size) = cli.chunk_size {
            self.chunk_size = size;
        }
        if let Some(n) = cli.max_concurrency {
            self.max_concurrency = n;
        }
        if let Some(hash) = cli.hash_algorithm {
            self.hash_algorithm = hash.into();
        }
        if cli.timeout_secs.is_some() {
            self.timeout_secs = cli.timeout_secs;
        }
    }

    pub fn upload_config(&self) -> UploadConfig {
        UploadConfig {
            chunk_size: self.chunk_size,
            max_concurrency: self.max_concurrency,
            hash_algorithm: self.hash_algorithm,
        }
    }

    pub fn http_config(&self) -> HttpConfig {
        HttpConfig {
            base_url: self.server_url.clone(),
            timeout_secs: self.timeout_secs,
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("chunkup").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("chunkup")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.server_url, "http://localhost:3001");
        assert_eq!(config.chunk_size, 10 * 1024 * 1024);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Md5);
        assert_eq!(config.timeout_secs, None);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = Config {
            server_url: "http://uploads.lan:8080".into(),
            chunk_size: 1024,
            max_concurrency: 2,
            hash_algorithm: HashAlgorithm::Sha256,
            timeout_secs: Some(30),
        };

        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains(r#"hash_algorithm = "sha256""#));
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn config_partial_toml() {
        let config: Config = toml::from_str("max_concurrency = 8").unwrap();
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.server_url, "http://localhost:3001");
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn config_path_not_empty() {
        let path = config_path();
        assert!(path.to_string_lossy().contains("chunkup"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_from(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn config_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let config = Config {
            chunk_size: 4096,
            ..Config::default()
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "chunk_size = \"big\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn flags_override_file_values() {
        let mut config = Config {
            server_url: "http://from-file".into(),
            timeout_secs: Some(5),
            ..Config::default()
        };
        let cli = Cli::parse_from(["chunkup", "a.bin", "--chunk-size", "2048", "--hash", "sha256"]);
        config.apply_overrides(&cli);

        assert_eq!(config.server_url, "http://from-file");
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha256);
        assert_eq!(config.timeout_secs, Some(5));

        let upload = config.upload_config();
        assert_eq!(upload.chunk_size, 2048);
        assert_eq!(config.http_config().base_url, "http://from-file");
    }
}
