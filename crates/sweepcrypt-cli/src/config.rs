//! Configuration file support for the sweepcrypt CLI.
//!
//! Configuration is stored at `~/.config/sweepcrypt/config.toml` (XDG
//! standard) unless `--config` or `SWEEPCRYPT_CONFIG` points elsewhere.
//!
//! # Example configuration
//!
//! ```toml
//! [storage]
//! root = "/srv/files"
//! state_dir = "/var/lib/sweepcrypt"
//!
//! [crypto]
//! key_file = "/etc/sweepcrypt/master.key"
//!
//! [engine]
//! default_batch = 4
//! error_retention = "7days"
//! lock_timeout = "30s"
//!
//! [walker]
//! reserved_names = [".trash", ".thumbnails"]
//! lock_prefix = ".lock"
//!
//! [access]
//! admins = ["root"]
//!
//! [access.managers]
//! "projects/alpha" = ["alice", "bob"]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sweepcrypt_core::walker::SkipRules;
use sweepcrypt_core::{Actor, AeadFileTransform, EngineConfig, FolderPath, StaticAccessPolicy};

/// Main configuration structure
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub crypto: CryptoConfig,

    #[serde(default)]
    pub engine: EngineSection,

    #[serde(default)]
    pub walker: SkipRules,

    #[serde(default)]
    pub access: AccessConfig,
}

/// Where files and job state live
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory that folder paths are resolved against
    pub root: Option<PathBuf>,

    /// Directory for job records, lock files and folder markers
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CryptoConfig {
    /// Hex-encoded 256-bit master key. Without it encryption is unavailable.
    pub key_file: Option<PathBuf>,
}

/// Overrides for the engine defaults
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EngineSection {
    pub default_batch: Option<usize>,

    pub plan_entry_limit: Option<u64>,

    #[serde(default, with = "humantime_serde")]
    pub error_retention: Option<Duration>,

    #[serde(default, with = "humantime_serde")]
    pub lock_timeout: Option<Duration>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct AccessConfig {
    /// Users who may manage every folder, including the storage root
    #[serde(default)]
    pub admins: Vec<String>,

    /// Folder path to the users allowed to manage it and its subfolders
    #[serde(default)]
    pub managers: BTreeMap<String, Vec<String>>,
}

impl Config {
    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing file at the default location yields the defaults; an
    /// explicitly requested file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => {
                let path = config_path()?;
                if !path.exists() {
                    return Ok(Config::default());
                }
                path
            }
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn storage_root(&self) -> Result<&Path> {
        self.storage
            .root
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No storage root configured. Set [storage] root in the config file."))
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.storage.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => default_state_dir(),
        }
    }

    pub fn engine_config(&self) -> Result<EngineConfig> {
        let mut engine = EngineConfig::new(self.state_dir()?)
            .with_skip_rules(self.walker.clone())
            .with_lock_timeout(self.engine.lock_timeout);
        if let Some(batch) = self.engine.default_batch {
            engine = engine.with_default_batch(batch);
        }
        if let Some(limit) = self.engine.plan_entry_limit {
            engine = engine.with_plan_entry_limit(limit);
        }
        if let Some(retention) = self.engine.error_retention {
            engine = engine.with_error_retention(retention);
        }
        Ok(engine)
    }

    pub fn access_policy(&self) -> Result<StaticAccessPolicy> {
        let mut policy = StaticAccessPolicy::new();
        for (folder, users) in &self.access.managers {
            let folder = FolderPath::parse(folder)
                .with_context(|| format!("Invalid folder in [access.managers]: {folder:?}"))?;
            for user in users {
                policy = policy.with_manager(folder.clone(), user.clone());
            }
        }
        Ok(policy)
    }

    /// The configured transform, or an unavailable one without a key file.
    pub fn transform(&self) -> Result<AeadFileTransform> {
        match &self.crypto.key_file {
            Some(path) => AeadFileTransform::from_key_file(path)
                .with_context(|| format!("Failed to load master key from {}", path.display())),
            None => Ok(AeadFileTransform::unavailable()),
        }
    }

    pub fn actor(&self, name: String) -> Actor {
        if self.access.admins.contains(&name) {
            Actor::admin(name)
        } else {
            Actor::new(name)
        }
    }
}

/// Get the path to the configuration file.
pub fn config_path() -> Result<PathBuf> {
    let base_dirs = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
    Ok(base_dirs.config_dir().join("sweepcrypt").join("config.toml"))
}

fn default_state_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "sweepcrypt")
        .ok_or_else(|| anyhow::anyhow!("Could not determine data directory; set [storage] state_dir"))?;
    Ok(dirs.data_local_dir().to_path_buf())
}
