//! Backup service: the facade the server and the CLI drive.
//!
//! Wires the snapshot, archive, retention, restore and team engines to one
//! [`Config`] and reports completions through an [`EventSink`].

use crate::archive::{self, ArchiveInfo, ArchiveStore, StoredArchive};
use crate::config::Config;
use crate::crypto;
use crate::events::{BackupEvent, DeletedArchive, EventSink, RestoreSummary};
use crate::restore::{RestoreEngine, RestorePreview, RestoreReport};
use crate::retention::{PruneReport, RetentionManager};
use crate::schema::Registry;
use crate::snapshot::{SnapshotDocument, SnapshotEngine};
use crate::store::DocumentStore;
use crate::team::TeamEncryptionService;
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

/// Source label used in events for uploaded archives.
pub const UPLOAD_SOURCE: &str = "upload";

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupOptions {
    #[serde(default)]
    pub include_sensitive: bool,
    #[serde(default)]
    pub encrypt: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestoreMode {
    Preview,
    Apply,
}

impl FromStr for RestoreMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "preview" => Ok(RestoreMode::Preview),
            "apply" => Ok(RestoreMode::Apply),
            other => Err(EngineError::InvalidInput(format!("unknown restore mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum RestoreOutcome {
    Preview(RestorePreview),
    Apply(RestoreReport),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyReport {
    pub name: String,
    pub digest_hex: String,
    /// False when there was no checksum sidecar to compare against
    pub checksum_verified: bool,
    /// Set when the payload could be decrypted and parsed
    pub documents: Option<usize>,
}

pub struct BackupService {
    config: Config,
    snapshots: SnapshotEngine,
    restore: RestoreEngine,
    team: TeamEncryptionService,
    events: Arc<dyn EventSink>,
}

impl BackupService {
    pub fn new(config: Config, store: Arc<dyn DocumentStore>, events: Arc<dyn EventSink>) -> Self {
        let registry = Registry::default();
        Self {
            snapshots: SnapshotEngine::new(store.clone(), registry.clone()),
            restore: RestoreEngine::new(store.clone(), registry, &config.restore),
            team: TeamEncryptionService::new(store, config.team),
            config,
            events,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn team(&self) -> &TeamEncryptionService {
        &self.team
    }

    pub fn restore_enabled(&self) -> bool {
        self.restore.is_enabled()
    }

    fn archives(&self) -> Result<ArchiveStore> {
        ArchiveStore::open(&self.config.backup.dir, &self.config.backup.prefix)
    }

    fn passphrase(&self) -> Option<&str> {
        self.config.backup.passphrase.as_deref().filter(|p| !p.is_empty())
    }

    pub fn create_backup(&self, options: BackupOptions) -> Result<ArchiveInfo> {
        let passphrase = match (options.encrypt, self.passphrase()) {
            (true, None) => {
                return Err(EngineError::NotConfigured(
                    "encryption requested but no backup passphrase is set".into(),
                ))
            }
            (true, Some(p)) => Some(p),
            (false, _) => None,
        };
        let archives = self.archives()?;

        let snapshot = self.snapshots.create_snapshot(options.include_sensitive)?;
        let created_at = snapshot.meta.created_at;
        let payload = archive::encode_snapshot(&snapshot)?;

        let info = match passphrase {
            Some(passphrase) => {
                let sealed = crypto::encrypt_with(&payload, passphrase, &self.config.backup.kdf)?;
                archives.write_sealed(&sealed, created_at, options.include_sensitive)?
            }
            None => archives.write_plain(&payload, created_at, options.include_sensitive)?,
        };

        info!(
            archive = %info.name,
            documents = snapshot.total_documents(),
            encrypted = info.encrypted,
            "Backup created"
        );
        self.events.emit(BackupEvent::ArchiveCreated(info.clone()));
        Ok(info)
    }

    pub fn list_backups(&self) -> Result<Vec<ArchiveInfo>> {
        self.archives()?.list()
    }

    /// Archive bytes as stored, checked against the checksum sidecar.
    pub fn read_backup(&self, name: &str) -> Result<StoredArchive> {
        self.archives()?.read(name)
    }

    pub fn verify_backup(&self, name: &str) -> Result<VerifyReport> {
        let stored = self.read_backup(name)?;
        let digest_hex = crypto::digest(&stored.bytes);

        let documents = if stored.encryption.is_some() && self.passphrase().is_none() {
            None
        } else {
            let payload = stored.payload(self.passphrase())?;
            Some(archive::decode_snapshot(&payload, self.config.backup.max_inflated_bytes)?.total_documents())
        };

        Ok(VerifyReport {
            name: name.to_string(),
            checksum_verified: stored.info.digest_hex.is_some(),
            digest_hex,
            documents,
        })
    }

    /// Decrypt and parse an archive.
    pub fn load_snapshot(&self, name: &str) -> Result<SnapshotDocument> {
        let stored = self.read_backup(name)?;
        let payload = stored.payload(self.passphrase())?;
        archive::decode_snapshot(&payload, self.config.backup.max_inflated_bytes)
    }

    pub fn delete_backup(&self, name: &str) -> Result<()> {
        self.archives()?.delete(name)?;
        self.events.emit(BackupEvent::ArchiveDeleted(DeletedArchive {
            name: name.to_string(),
        }));
        Ok(())
    }

    /// Prune with `days`, or the configured retention when `None`.
    pub fn prune(&self, days: Option<u32>, dry_run: bool) -> Result<PruneReport> {
        let days = days.unwrap_or(self.config.backup.retention_days);
        let report = RetentionManager::new(&self.config.backup.dir, &self.config.backup.prefix)
            .prune(days, dry_run)?;
        self.events.emit(BackupEvent::RetentionCompleted(report.clone()));
        Ok(report)
    }

    pub fn restore_archive(&self, name: &str, mode: RestoreMode) -> Result<RestoreOutcome> {
        if mode == RestoreMode::Apply {
            self.restore.ensure_enabled()?;
        }
        let snapshot = self.load_snapshot(name)?;
        self.run_restore(name, &snapshot, mode)
    }

    /// Restore from an uploaded gzip payload.
    pub fn restore_upload(&self, bytes: &[u8], mode: RestoreMode) -> Result<RestoreOutcome> {
        if mode == RestoreMode::Apply {
            self.restore.ensure_enabled()?;
        }
        let snapshot = archive::decode_snapshot(bytes, self.config.backup.max_inflated_bytes)?;
        self.run_restore(UPLOAD_SOURCE, &snapshot, mode)
    }

    fn run_restore(&self, source: &str, snapshot: &SnapshotDocument, mode: RestoreMode) -> Result<RestoreOutcome> {
        let documents = snapshot.total_documents();
        match mode {
            RestoreMode::Preview => {
                let preview = self.restore.preview_restore(snapshot)?;
                self.events.emit(BackupEvent::RestorePreviewed(RestoreSummary {
                    source: source.to_string(),
                    documents,
                    inserted: 0,
                    skipped: 0,
                    warnings: preview.warnings.len(),
                }));
                Ok(RestoreOutcome::Preview(preview))
            }
            RestoreMode::Apply => {
                let report = self.restore.apply_restore(snapshot)?;
                self.events.emit(BackupEvent::RestoreApplied(RestoreSummary {
                    source: source.to_string(),
                    documents,
                    inserted: report.total_inserted(),
                    skipped: report.total_skipped(),
                    warnings: 0,
                }));
                Ok(RestoreOutcome::Apply(report))
            }
        }
    }
}
