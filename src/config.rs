//! Engine settings loaded from TOML.
//!
//! Every field has a default, so a missing file or a partial file is fine:
//!
//! ```toml
//! [package_manager]
//! auto_yes = true
//! install_recommends = false
//!
//! [timeouts]
//! command_total = 600
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::package::PackageManager;
use crate::error::ConfigError;

pub const CONFIG_ENV: &str = "INITIALIZER_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    pub package_manager: PackageManagerSettings,
    pub timeouts: Timeouts,
    pub status: StatusSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PackageManagerSettings {
    /// Pass the manager's non-interactive confirmation flag.
    pub auto_yes: bool,
    /// apt: install recommended packages (otherwise `--no-install-recommends`).
    pub install_recommends: bool,
    /// apt: add `--install-suggests`.
    pub install_suggests: bool,
    /// Run the index refresh (`apt-get update`) once before the first install.
    pub refresh_index_once: bool,
    /// Force a manager instead of detecting one.
    #[serde(rename = "override", skip_serializing_if = "Option::is_none")]
    pub manager_override: Option<String>,
}

impl Default for PackageManagerSettings {
    fn default() -> Self {
        Self {
            auto_yes: true,
            install_recommends: true,
            install_suggests: false,
            refresh_index_once: true,
            manager_override: None,
        }
    }
}

/// All values in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Timeouts {
    pub batch_query: u64,
    pub individual_query: u64,
    pub sudo_verify: u64,
    pub privileged_command: u64,
    pub line_stall: u64,
    pub command_total: u64,
    pub kill_grace: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            batch_query: 30,
            individual_query: 10,
            sudo_verify: 10,
            privileged_command: 300,
            line_stall: 30,
            command_total: 270,
            kill_grace: 5,
        }
    }
}

impl Timeouts {
    pub fn batch_query(&self) -> Duration {
        Duration::from_secs(self.batch_query)
    }

    pub fn individual_query(&self) -> Duration {
        Duration::from_secs(self.individual_query)
    }

    pub fn sudo_verify(&self) -> Duration {
        Duration::from_secs(self.sudo_verify)
    }

    pub fn privileged_command(&self) -> Duration {
        Duration::from_secs(self.privileged_command)
    }

    pub fn line_stall(&self) -> Duration {
        Duration::from_secs(self.line_stall)
    }

    pub fn command_total(&self) -> Duration {
        Duration::from_secs(self.command_total)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatusSettings {
    /// Cap on concurrent per-package queries. 0 means unbounded.
    pub max_concurrent_queries: usize,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            max_concurrent_queries: 16,
        }
    }
}

impl EngineConfig {
    /// `$INITIALIZER_CONFIG`, else `<config dir>/initializer/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV)
            && !path.trim().is_empty()
        {
            return Some(PathBuf::from(shellexpand::tilde(&path).into_owned()));
        }
        dirs::config_dir().map(|dir| dir.join("initializer").join("config.toml"))
    }

    /// Load from `path`, or from [`default_path`](Self::default_path).
    ///
    /// An explicitly given file must exist; a missing default file yields
    /// the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::from_toml_str(&contents, &path)
    }

    pub fn from_toml_str(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Toml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The manager forced by `[package_manager] override`, if any.
    pub fn forced_manager(&self) -> Result<Option<PackageManager>, ConfigError> {
        self.package_manager
            .manager_override
            .as_deref()
            .map(str::parse)
            .transpose()
    }
}
