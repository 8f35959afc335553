#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for bindist
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/bindist/config.toml)
//! - Environment variables
//! - CLI flags (applied by the binary)

use bindist_errors::{ConfigError, Error};
use bindist_types::RewriterKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub paths: PathConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub relocation: RelocationConfig,
    #[serde(default)]
    pub install: InstallConfig,
    #[serde(default)]
    pub mirrors: Vec<MirrorConfig>,
}

/// Path configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PathConfig {
    /// Install root that package prefixes are created under
    pub store_root: Option<PathBuf>,
    /// Scratch space for fetched archives
    pub cache_dir: Option<PathBuf>,
    /// Trusted public keys used for verification
    pub keys_dir: Option<PathBuf>,
    /// Installed-package registry file
    pub registry: Option<PathBuf>,
}

/// Signing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    /// Minisign secret key used by `create`
    pub secret_key: Option<PathBuf>,
    /// Environment variable holding the secret key password
    pub password_env: Option<String>,
    /// Comment embedded in trusted signature comments
    #[serde(default = "default_trusted_comment")]
    pub trusted_comment: String,
}

/// Relocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelocationConfig {
    #[serde(default)]
    pub rewriter: RewriterKind,
    /// Binaries patched concurrently; 0 = number of CPUs
    #[serde(default)]
    pub max_parallel: usize,
    /// Also rewrite NUL-terminated strings embedded in binaries
    #[serde(default)]
    pub patch_binary_strings: bool,
}

/// Install configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InstallConfig {
    /// Whole-install timeout in seconds; unset = no timeout
    pub timeout_secs: Option<u64>,
}

/// A build cache mirror rooted at a local directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MirrorConfig {
    pub name: String,
    pub path: PathBuf,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            secret_key: None,
            password_env: None,
            trusted_comment: default_trusted_comment(),
        }
    }
}

impl Default for RelocationConfig {
    fn default() -> Self {
        Self {
            rewriter: RewriterKind::Native,
            max_parallel: 0,
            patch_binary_strings: false,
        }
    }
}

fn default_trusted_comment() -> String {
    "bindist build cache entry".to_string()
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir.join("bindist").join("config.toml"))
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)
            .await
            .map_err(|_| ConfigError::NotFound {
                path: path.display().to_string(),
            })?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })
            .map_err(Into::into)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub async fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;
        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        if let Ok(root) = std::env::var("BINDIST_STORE_ROOT") {
            self.paths.store_root = Some(PathBuf::from(root));
        }

        if let Ok(dir) = std::env::var("BINDIST_CACHE_DIR") {
            self.paths.cache_dir = Some(PathBuf::from(dir));
        }

        // BINDIST_MIRROR takes precedence over configured mirrors
        if let Ok(mirror) = std::env::var("BINDIST_MIRROR") {
            if mirror.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "BINDIST_MIRROR".to_string(),
                    value: mirror,
                }
                .into());
            }
            self.mirrors.retain(|m| m.name != "env");
            self.mirrors.insert(
                0,
                MirrorConfig {
                    name: "env".to_string(),
                    path: PathBuf::from(mirror),
                },
            );
        }

        if let Ok(key) = std::env::var("BINDIST_SECRET_KEY") {
            self.signing.secret_key = Some(PathBuf::from(key));
        }

        if let Ok(timeout) = std::env::var("BINDIST_INSTALL_TIMEOUT") {
            let secs: u64 = timeout.parse().map_err(|_| ConfigError::InvalidValue {
                field: "BINDIST_INSTALL_TIMEOUT".to_string(),
                value: timeout.clone(),
            })?;
            self.install.timeout_secs = (secs > 0).then_some(secs);
        }

        if let Ok(rewriter) = std::env::var("BINDIST_REWRITER") {
            self.relocation.rewriter =
                rewriter.parse().map_err(|_| ConfigError::InvalidValue {
                    field: "BINDIST_REWRITER".to_string(),
                    value: rewriter.clone(),
                })?;
        }

        if let Ok(jobs) = std::env::var("BINDIST_MAX_PARALLEL") {
            self.relocation.max_parallel = jobs.parse().map_err(|_| ConfigError::InvalidValue {
                field: "BINDIST_MAX_PARALLEL".to_string(),
                value: jobs,
            })?;
        }

        Ok(())
    }

    /// Install root (with default)
    #[must_use]
    pub fn store_root(&self) -> PathBuf {
        self.paths.store_root.clone().unwrap_or_else(|| {
            dirs::data_dir().map_or_else(
                || PathBuf::from("/opt/bindist"),
                |dir| dir.join("bindist").join("opt"),
            )
        })
    }

    /// Fetch cache directory (with default)
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.paths.cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("bindist")
        })
    }

    /// Trusted keyring directory (with default)
    #[must_use]
    pub fn keys_dir(&self) -> PathBuf {
        self.paths
            .keys_dir
            .clone()
            .unwrap_or_else(|| self.data_dir().join("keys"))
    }

    /// Installed-package registry file (with default)
    #[must_use]
    pub fn registry_path(&self) -> PathBuf {
        self.paths
            .registry
            .clone()
            .unwrap_or_else(|| self.data_dir().join("installed.json"))
    }

    /// Number of binaries patched concurrently
    #[must_use]
    pub fn max_parallel(&self) -> usize {
        match self.relocation.max_parallel {
            0 => num_cpus::get().max(1),
            n => n,
        }
    }

    /// Look up a mirror by name
    #[must_use]
    pub fn mirror(&self, name: &str) -> Option<&MirrorConfig> {
        self.mirrors.iter().find(|m| m.name == name)
    }

    fn data_dir(&self) -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("bindist")
    }
}
