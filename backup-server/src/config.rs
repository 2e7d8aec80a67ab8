use backup_engine::config::{Config as EngineConfig, PASSPHRASE_ENV, RESTORE_ENABLED_ENV};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub log_level: String,
    /// Largest accepted restore upload
    pub max_upload_bytes: usize,
    /// Cron expression for the scheduled snapshot + prune, if any
    pub backup_cron: Option<String>,
    pub cron_include_sensitive: bool,
    pub cron_encrypt: bool,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let data_dir = PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".into()));

        let mut engine = EngineConfig::default();
        engine.backup.dir = std::env::var("BACKUPS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("backups"));
        engine.backup.prefix = std::env::var("BACKUP_PREFIX").unwrap_or_else(|_| "backup".into());
        engine.backup.retention_days = env_or("BACKUP_RETENTION_DAYS", engine.backup.retention_days);
        engine.backup.kdf.memory_kib = env_or("BACKUP_KDF_MEMORY_KIB", engine.backup.kdf.memory_kib);
        engine.backup.kdf.iterations = env_or("BACKUP_KDF_ITERATIONS", engine.backup.kdf.iterations);
        engine.backup.max_inflated_bytes =
            env_or::<u64>("MAX_INFLATED_MB", engine.backup.max_inflated_bytes / (1024 * 1024)) * 1024 * 1024;
        engine.team.default_iterations = env_or("TEAM_KDF_ITERATIONS", engine.team.default_iterations);
        engine.team.min_iterations = env_or("TEAM_KDF_MIN_ITERATIONS", engine.team.min_iterations);
        engine.team.max_iterations = env_or("TEAM_KDF_MAX_ITERATIONS", engine.team.max_iterations);
        // BACKUP_PASSPHRASE and BACKUP_RESTORE_ENABLED
        engine.apply_env_overrides();

        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
        engine.log.level = log_level.clone();

        if engine.restore.enabled {
            tracing::warn!("{RESTORE_ENABLED_ENV} is set: restore apply is allowed");
        }
        if engine.backup.passphrase.is_none() {
            tracing::info!("{PASSPHRASE_ENV} not set: encrypted backups are unavailable");
        }

        Self {
            port: env_or("PORT", 3000),
            db_path: data_dir.join("documents.db"),
            data_dir,
            log_level,
            max_upload_bytes: env_or::<usize>("MAX_UPLOAD_MB", 512) * 1024 * 1024,
            backup_cron: std::env::var("BACKUP_CRON").ok().filter(|v| !v.trim().is_empty()),
            cron_include_sensitive: std::env::var("BACKUP_CRON_INCLUDE_SENSITIVE")
                .map(|v| backup_engine::config::parse_flag(&v))
                .unwrap_or(false),
            cron_encrypt: std::env::var("BACKUP_CRON_ENCRYPT")
                .map(|v| backup_engine::config::parse_flag(&v))
                .unwrap_or(false),
            engine,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
