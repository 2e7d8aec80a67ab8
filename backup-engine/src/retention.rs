//! Retention pruning of the archive directory.
//!
//! Only basenames matching the archive naming pattern are considered; age is
//! taken from the file's modification time.

use crate::archive::{is_archive_name, remove_sidecars};
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use walkdir::WalkDir;

const SECS_PER_DAY: u64 = 86_400;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneFailure {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneReport {
    pub examined: usize,
    pub deleted: Vec<String>,
    pub kept: Vec<String>,
    pub errors: Vec<PruneFailure>,
    pub dry_run: bool,
    pub retention_days: u32,
}

pub struct RetentionManager {
    dir: PathBuf,
    prefix: String,
}

impl RetentionManager {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn prune(&self, retention_days: u32, dry_run: bool) -> Result<PruneReport> {
        self.prune_at(retention_days, dry_run, SystemTime::now())
    }

    /// Delete (or with `dry_run`, only report) archives strictly older than
    /// `retention_days` as of `now`.
    pub fn prune_at(&self, retention_days: u32, dry_run: bool, now: SystemTime) -> Result<PruneReport> {
        if retention_days == 0 {
            return Err(EngineError::InvalidInput(
                "retention days must be a positive integer".into(),
            ));
        }
        if !self.dir.is_dir() {
            return Err(EngineError::NotConfigured(format!(
                "backup directory {} does not exist",
                self.dir.display()
            )));
        }

        let max_age = Duration::from_secs(u64::from(retention_days) * SECS_PER_DAY);
        let mut report = PruneReport {
            dry_run,
            retention_days,
            ..Default::default()
        };

        for (name, path) in self.archive_files()? {
            report.examined += 1;

            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) => {
                    report.errors.push(PruneFailure {
                        name,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            // A timestamp in the future counts as brand new.
            let age = now.duration_since(modified).unwrap_or(Duration::ZERO);

            if age <= max_age {
                report.kept.push(name);
                continue;
            }

            if dry_run {
                report.deleted.push(name);
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    remove_sidecars(&self.dir, &name);
                    report.deleted.push(name);
                }
                // Gone already: another prune got there first.
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    remove_sidecars(&self.dir, &name);
                    report.deleted.push(name);
                }
                Err(e) => {
                    warn!(archive = %name, error = %e, "Failed to delete expired archive");
                    report.errors.push(PruneFailure {
                        name,
                        error: e.to_string(),
                    });
                }
            }
        }

        report.deleted.sort();
        report.kept.sort();

        info!(
            examined = report.examined,
            deleted = report.deleted.len(),
            kept = report.kept.len(),
            errors = report.errors.len(),
            dry_run,
            retention_days,
            "Retention pass finished"
        );
        Ok(report)
    }

    fn archive_files(&self) -> Result<Vec<(String, PathBuf)>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if is_archive_name(&self.prefix, &name) {
                files.push((name, entry.path().to_path_buf()));
            }
        }
        Ok(files)
    }
}

/// One-shot form of [`RetentionManager::prune`].
pub fn prune(directory: &Path, prefix: &str, retention_days: u32, dry_run: bool) -> Result<PruneReport> {
    RetentionManager::new(directory, prefix).prune(retention_days, dry_run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::archive_name;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(SECS_PER_DAY);

    /// Write an archive with both sidecars and backdate it by `age`.
    fn archive_aged(dir: &Path, index: i64, age: Duration, now: SystemTime) -> String {
        let ts = Utc.timestamp_opt(1_790_000_000 + index, 0).unwrap();
        let name = archive_name("backup", ts, false, true);
        let path = dir.join(&name);
        fs::write(&path, b"ciphertext").unwrap();
        fs::write(dir.join(format!("{name}.sha256")), b"abc  name\n").unwrap();
        fs::write(dir.join(format!("{name}.meta.json")), b"{}").unwrap();

        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(now - age).unwrap();
        name
    }

    fn fixture(now: SystemTime) -> (TempDir, Vec<String>, Vec<String>) {
        let temp_dir = TempDir::new().unwrap();
        let old = vec![
            archive_aged(temp_dir.path(), 1, DAY * 40, now),
            archive_aged(temp_dir.path(), 2, DAY * 30 + Duration::from_secs(60), now),
        ];
        let fresh = vec![
            archive_aged(temp_dir.path(), 3, DAY * 30 - Duration::from_secs(60), now),
            archive_aged(temp_dir.path(), 4, DAY, now),
        ];
        // Not archives: never touched.
        fs::write(temp_dir.path().join("README.txt"), b"keep me").unwrap();
        let notes = temp_dir.path().join("backup-notes.json.gz");
        fs::write(&notes, b"x").unwrap();
        fs::File::options()
            .write(true)
            .open(&notes)
            .unwrap()
            .set_modified(now - DAY * 365)
            .unwrap();

        let mut old = old;
        old.sort();
        let mut fresh = fresh;
        fresh.sort();
        (temp_dir, old, fresh)
    }

    #[test]
    fn test_dry_run_reports_without_deleting() {
        let now = SystemTime::now();
        let (temp_dir, old, fresh) = fixture(now);
        let manager = RetentionManager::new(temp_dir.path(), "backup");

        let report = manager.prune_at(30, true, now).unwrap();
        assert!(report.dry_run);
        assert_eq!(report.examined, 4);
        assert_eq!(report.deleted, old);
        assert_eq!(report.kept, fresh);
        for name in &old {
            assert!(temp_dir.path().join(name).exists());
        }
    }

    #[test]
    fn test_prune_deletes_exactly_the_dry_run_set() {
        let now = SystemTime::now();
        let (temp_dir, old, fresh) = fixture(now);
        let manager = RetentionManager::new(temp_dir.path(), "backup");

        let planned = manager.prune_at(30, true, now).unwrap();
        let report = manager.prune_at(30, false, now).unwrap();
        assert_eq!(report.deleted, planned.deleted);
        assert!(report.errors.is_empty());

        for name in &old {
            assert!(!temp_dir.path().join(name).exists());
            assert!(!temp_dir.path().join(format!("{name}.sha256")).exists());
            assert!(!temp_dir.path().join(format!("{name}.meta.json")).exists());
        }
        for name in &fresh {
            assert!(temp_dir.path().join(name).exists());
            assert!(temp_dir.path().join(format!("{name}.sha256")).exists());
        }
        assert!(temp_dir.path().join("README.txt").exists());
        assert!(temp_dir.path().join("backup-notes.json.gz").exists());
    }

    #[test]
    fn test_prune_is_idempotent() {
        let now = SystemTime::now();
        let (temp_dir, _, fresh) = fixture(now);
        let manager = RetentionManager::new(temp_dir.path(), "backup");

        manager.prune_at(30, false, now).unwrap();
        let second = manager.prune_at(30, false, now).unwrap();
        assert!(second.deleted.is_empty());
        assert_eq!(second.kept, fresh);
    }

    #[test]
    fn test_missing_sidecars_do_not_fail_prune() {
        let now = SystemTime::now();
        let temp_dir = TempDir::new().unwrap();
        let name = archive_aged(temp_dir.path(), 1, DAY * 10, now);
        fs::remove_file(temp_dir.path().join(format!("{name}.meta.json"))).unwrap();
        fs::remove_file(temp_dir.path().join(format!("{name}.sha256"))).unwrap();

        let report = RetentionManager::new(temp_dir.path(), "backup")
            .prune_at(7, false, now)
            .unwrap();
        assert_eq!(report.deleted, vec![name]);
        assert!(report.errors.is_empty());
    }

    #[test]
    fn test_rejects_zero_days_and_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        let manager = RetentionManager::new(temp_dir.path(), "backup");
        assert!(matches!(manager.prune(0, true), Err(EngineError::InvalidInput(_))));

        let missing = RetentionManager::new(temp_dir.path().join("gone"), "backup");
        assert!(matches!(missing.prune(7, true), Err(EngineError::NotConfigured(_))));
    }

    #[test]
    fn test_free_function_uses_wall_clock() {
        let temp_dir = TempDir::new().unwrap();
        let now = SystemTime::now();
        archive_aged(temp_dir.path(), 1, DAY * 3, now);
        let report = prune(temp_dir.path(), "backup", 1, true).unwrap();
        assert_eq!(report.deleted.len(), 1);
    }
}
