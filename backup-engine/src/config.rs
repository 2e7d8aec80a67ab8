//! Configuration for the backup engine.
//!
//! Loads configuration from a TOML file. Secrets can come from the
//! environment instead of the file.

use crate::crypto::KdfParams;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable holding the archive passphrase.
pub const PASSPHRASE_ENV: &str = "BACKUP_PASSPHRASE";
/// Environment variable that turns restore apply on.
pub const RESTORE_ENABLED_ENV: &str = "BACKUP_RESTORE_ENABLED";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub restore: RestoreConfig,
    #[serde(default)]
    pub team: TeamConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Directory holding archives and their sidecars
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,

    /// Archive name prefix
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Days an archive is kept before pruning
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Passphrase for encrypted archives
    #[serde(default)]
    pub passphrase: Option<String>,

    /// Argon2id cost for new encrypted archives
    #[serde(default)]
    pub kdf: KdfParams,

    /// Largest decompressed archive accepted for reading or restore
    #[serde(default = "default_max_inflated_bytes")]
    pub max_inflated_bytes: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreConfig {
    /// Restore apply is refused unless this is set
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamConfig {
    /// PBKDF2 iterations suggested to clients
    #[serde(default = "default_team_iterations")]
    pub default_iterations: u32,

    #[serde(default = "default_min_iterations")]
    pub min_iterations: u32,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_backup_dir() -> PathBuf {
    PathBuf::from("./backups")
}

fn default_prefix() -> String {
    "backup".to_string()
}

fn default_retention_days() -> u32 {
    30
}

fn default_max_inflated_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_team_iterations() -> u32 {
    crate::team::DEFAULT_ITERATIONS
}

fn default_min_iterations() -> u32 {
    10_000
}

fn default_max_iterations() -> u32 {
    10_000_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
            prefix: default_prefix(),
            retention_days: default_retention_days(),
            passphrase: None,
            kdf: KdfParams::default(),
            max_inflated_bytes: default_max_inflated_bytes(),
        }
    }
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            default_iterations: default_team_iterations(),
            min_iterations: default_min_iterations(),
            max_iterations: default_max_iterations(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Fill secrets and switches from the environment when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(passphrase) = std::env::var(PASSPHRASE_ENV) {
            if !passphrase.is_empty() {
                self.backup.passphrase = Some(passphrase);
            }
        }
        if let Ok(value) = std::env::var(RESTORE_ENABLED_ENV) {
            self.restore.enabled = parse_flag(&value);
        }
    }
}

pub fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
