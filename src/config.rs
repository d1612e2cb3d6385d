//! Configuration from `rampa.toml` and `RAMPA_*` environment variables.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Deserialize;

use crate::error::{DeployError, DeployResult};

pub const DEFAULT_CONFIG_FILE: &str = "rampa.toml";
pub const ENV_PREFIX: &str = "RAMPA_";

/// Service configuration. Every field has a default, so an absent
/// file is a valid configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub build: BuildConfig,

    #[serde(default)]
    pub deploy: DeployConfig,

    #[serde(default)]
    pub checkout: CheckoutConfig,

    /// Used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            build: BuildConfig::default(),
            deploy: DeployConfig::default(),
            checkout: CheckoutConfig::default(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load `rampa.toml` from the working directory, then the
    /// environment.
    pub fn load() -> DeployResult<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load a specific file, then the environment. A missing file is
    /// not an error.
    pub fn load_from(path: &Path) -> DeployResult<Self> {
        Self::extract(Figment::new().merge(Toml::file(path)))
    }

    /// Parse a TOML document, then apply the environment.
    pub fn from_toml(content: &str) -> DeployResult<Self> {
        Self::extract(Figment::new().merge(Toml::string(content)))
    }

    fn extract(figment: Figment) -> DeployResult<Self> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| DeployError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Root of the record store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Where repositories are cloned.
    #[serde(default = "default_checkout_dir")]
    pub checkout_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            checkout_dir: default_checkout_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_checkout_dir() -> PathBuf {
    PathBuf::from("temp/repos")
}

#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfig {
    /// Shared budget for every step of the build command chain.
    #[serde(default = "default_phase_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_phase_timeout")]
    pub install_timeout_secs: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_phase_timeout(),
            install_timeout_secs: default_phase_timeout(),
        }
    }
}

impl BuildConfig {
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    #[must_use]
    pub const fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeployConfig {
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,

    /// Pipelines allowed to run at once; the rest queue.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Extra attempts with a fresh name when a container name is taken.
    #[serde(default = "default_collision_retries")]
    pub collision_retries: u32,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            upload_timeout_secs: default_upload_timeout(),
            max_concurrent: default_max_concurrent(),
            collision_retries: default_collision_retries(),
            retention_days: default_retention_days(),
        }
    }
}

impl DeployConfig {
    #[must_use]
    pub const fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_secs)
    }

    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutConfig {
    #[serde(default = "default_clone_timeout")]
    pub clone_timeout_secs: u64,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            clone_timeout_secs: default_clone_timeout(),
        }
    }
}

impl CheckoutConfig {
    #[must_use]
    pub const fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }
}

const fn default_phase_timeout() -> u64 {
    600
}

const fn default_upload_timeout() -> u64 {
    900
}

const fn default_max_concurrent() -> usize {
    5
}

const fn default_collision_retries() -> u32 {
    1
}

const fn default_retention_days() -> u32 {
    30
}

const fn default_clone_timeout() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_toml("").expect("defaults");

        assert_eq!(config.paths.data_dir, PathBuf::from("data"));
        assert_eq!(config.paths.checkout_dir, PathBuf::from("temp/repos"));
        assert_eq!(config.build.timeout(), Duration::from_secs(600));
        assert_eq!(config.deploy.max_concurrent, 5);
        assert_eq!(config.deploy.collision_retries, 1);
        assert_eq!(config.checkout.clone_timeout(), Duration::from_secs(300));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_level, Config::default().log_level);
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::from_toml(
            r#"
            log_level = "debug"

            [build]
            timeout_secs = 30

            [deploy]
            max_concurrent = 2
            retention_days = 7
            "#,
        )
        .expect("parse");

        assert_eq!(config.log_level, "debug");
        assert_eq!(config.build.timeout_secs, 30);
        assert_eq!(config.build.install_timeout_secs, 600);
        assert_eq!(config.deploy.max_concurrent, 2);
        assert_eq!(config.deploy.retention(), chrono::Duration::days(7));
    }

    #[test]
    fn wrong_type_is_config_error() {
        let err = Config::from_toml("[build]\ntimeout_secs = \"soon\"").err();
        assert!(matches!(err, Some(DeployError::Config(_))));
    }
}
