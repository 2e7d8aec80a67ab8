//! On-disk archive format.
//!
//! `{prefix}-{timestamp}[-full].json.gz[.enc]` plus a `<name>.sha256`
//! sidecar, and a `<name>.meta.json` sidecar for encrypted archives.
//! Archives are never modified after they are written.

use crate::crypto::{self, EncryptionMetadata, Sealed};
use crate::snapshot::SnapshotDocument;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub const ARCHIVE_EXTENSION: &str = ".json.gz";
pub const ENCRYPTED_SUFFIX: &str = ".enc";
pub const FULL_MARKER: &str = "-full";
pub const CHECKSUM_SUFFIX: &str = ".sha256";
pub const METADATA_SUFFIX: &str = ".meta.json";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

// ── Naming ──

/// What an archive name says about its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveName {
    pub created_at: DateTime<Utc>,
    pub includes_sensitive: bool,
    pub encrypted: bool,
}

pub fn archive_name(
    prefix: &str,
    created_at: DateTime<Utc>,
    includes_sensitive: bool,
    encrypted: bool,
) -> String {
    let stamp = created_at
        .to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-");
    format!(
        "{prefix}-{stamp}{}{ARCHIVE_EXTENSION}{}",
        if includes_sensitive { FULL_MARKER } else { "" },
        if encrypted { ENCRYPTED_SUFFIX } else { "" },
    )
}

/// Reject anything that could escape the archive directory. Runs before any
/// filesystem access.
pub fn ensure_plain_basename(name: &str) -> Result<()> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || name.contains("..")
    {
        return Err(EngineError::InvalidFilename(name.to_string()));
    }
    Ok(())
}

/// Validate a caller-supplied archive name against the naming pattern.
pub fn parse_archive_name(prefix: &str, name: &str) -> Result<ArchiveName> {
    ensure_plain_basename(name)?;
    parse_name_parts(prefix, name).ok_or_else(|| EngineError::InvalidFilename(name.to_string()))
}

pub fn is_archive_name(prefix: &str, name: &str) -> bool {
    parse_archive_name(prefix, name).is_ok()
}

fn parse_name_parts(prefix: &str, name: &str) -> Option<ArchiveName> {
    let rest = name.strip_prefix(prefix)?.strip_prefix('-')?;
    let (rest, encrypted) = match rest.strip_suffix(ENCRYPTED_SUFFIX) {
        Some(r) => (r, true),
        None => (rest, false),
    };
    let rest = rest.strip_suffix(ARCHIVE_EXTENSION)?;
    let (stamp, includes_sensitive) = match rest.strip_suffix(FULL_MARKER) {
        Some(r) => (r, true),
        None => (rest, false),
    };
    Some(ArchiveName {
        created_at: parse_stamp(stamp)?,
        includes_sensitive,
        encrypted,
    })
}

/// `2026-10-19T08-15-30-123Z` back to a UTC instant.
fn parse_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    let (date, time) = stamp.split_once('T')?;
    let time = time.strip_suffix('Z')?;
    let parts: Vec<&str> = time.split('-').collect();
    let [h, m, s, ms] = parts.as_slice() else {
        return None;
    };
    let rfc3339 = format!("{date}T{h}:{m}:{s}.{ms}Z");
    DateTime::parse_from_rfc3339(&rfc3339)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ── Codec ──

pub fn compress(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Inflate a gzip payload, refusing anything that grows past `limit` bytes.
pub fn decompress(bytes: &[u8], limit: u64) -> Result<Vec<u8>> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Err(EngineError::MalformedBackup("not gzip data".into()));
    }
    let mut decoder = GzDecoder::new(bytes).take(limit.saturating_add(1));
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| EngineError::MalformedBackup(format!("gzip decompression failed: {e}")))?;
    if out.len() as u64 > limit {
        return Err(EngineError::MalformedBackup(format!(
            "archive exceeds {limit} bytes when decompressed"
        )));
    }
    Ok(out)
}

pub fn encode_snapshot(snapshot: &SnapshotDocument) -> Result<Vec<u8>> {
    compress(&snapshot.to_json_vec()?)
}

/// Decompress and shape-check an unencrypted archive payload.
pub fn decode_snapshot(bytes: &[u8], limit: u64) -> Result<SnapshotDocument> {
    SnapshotDocument::from_json_slice(&decompress(bytes, limit)?)
}

// ── Store ──

/// One row of an archive listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveInfo {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub encrypted: bool,
    pub includes_sensitive: bool,
    pub digest_hex: Option<String>,
}

/// Archive bytes read back from disk, digest already verified.
#[derive(Debug, Clone)]
pub struct StoredArchive {
    pub info: ArchiveInfo,
    pub bytes: Vec<u8>,
    pub encryption: Option<EncryptionMetadata>,
}

impl StoredArchive {
    /// The gzip payload, decrypting first when needed.
    pub fn payload(&self, passphrase: Option<&str>) -> Result<Vec<u8>> {
        match &self.encryption {
            None => Ok(self.bytes.clone()),
            Some(meta) => {
                let passphrase = passphrase.ok_or_else(|| {
                    EngineError::NotConfigured("archive is encrypted but no passphrase is set".into())
                })?;
                let sealed = meta.to_sealed(self.bytes.clone())?;
                crypto::decrypt(&sealed, passphrase)
            }
        }
    }
}

pub struct ArchiveStore {
    dir: PathBuf,
    prefix: String,
}

impl ArchiveStore {
    /// Open an existing archive directory.
    pub fn open(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(EngineError::NotConfigured(format!(
                "backup directory {} does not exist",
                dir.display()
            )));
        }
        Ok(Self {
            dir,
            prefix: prefix.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Resolve a validated archive name inside the directory.
    pub fn path_of(&self, name: &str) -> Result<PathBuf> {
        parse_archive_name(&self.prefix, name)?;
        Ok(self.dir.join(name))
    }

    /// Write a plain archive and its checksum sidecar.
    pub fn write_plain(
        &self,
        payload: &[u8],
        created_at: DateTime<Utc>,
        includes_sensitive: bool,
    ) -> Result<ArchiveInfo> {
        let name = archive_name(&self.prefix, created_at, includes_sensitive, false);
        self.write_archive(&name, payload, None, created_at, includes_sensitive)
    }

    /// Write an encrypted archive, its metadata sidecar and checksum sidecar.
    pub fn write_sealed(
        &self,
        sealed: &Sealed,
        created_at: DateTime<Utc>,
        includes_sensitive: bool,
    ) -> Result<ArchiveInfo> {
        let name = archive_name(&self.prefix, created_at, includes_sensitive, true);
        let original = archive_name(&self.prefix, created_at, includes_sensitive, false);
        let meta = EncryptionMetadata::describe(sealed, &original);
        self.write_archive(&name, &sealed.ciphertext, Some(&meta), created_at, includes_sensitive)
    }

    fn write_archive(
        &self,
        name: &str,
        bytes: &[u8],
        encryption: Option<&EncryptionMetadata>,
        created_at: DateTime<Utc>,
        includes_sensitive: bool,
    ) -> Result<ArchiveInfo> {
        let path = self.dir.join(name);
        if path.exists() {
            return Err(EngineError::AlreadyExists(name.to_string()));
        }

        let digest_hex = crypto::digest(bytes);

        // Sidecars land first so a visible archive always has them.
        if let Some(meta) = encryption {
            let meta_json = serde_json::to_vec_pretty(meta)?;
            write_atomic(&self.dir, &format!("{name}{METADATA_SUFFIX}"), &meta_json)?;
        }
        let checksum_line = format!("{digest_hex}  {name}\n");
        write_atomic(&self.dir, &format!("{name}{CHECKSUM_SUFFIX}"), checksum_line.as_bytes())?;
        write_atomic(&self.dir, name, bytes)?;

        info!(archive = %name, size = bytes.len(), encrypted = encryption.is_some(), "Archive written");

        Ok(ArchiveInfo {
            name: name.to_string(),
            created_at,
            size_bytes: bytes.len() as u64,
            encrypted: encryption.is_some(),
            includes_sensitive,
            digest_hex: Some(digest_hex),
        })
    }

    /// Every archive in the directory, newest first.
    pub fn list(&self) -> Result<Vec<ArchiveInfo>> {
        let mut archives = Vec::new();

        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| {
                EngineError::Io(e.into_io_error().unwrap_or_else(|| {
                    std::io::Error::new(ErrorKind::Other, "directory walk failed")
                }))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Ok(parsed) = parse_archive_name(&self.prefix, &name) else {
                continue;
            };
            let size_bytes = entry.metadata().map(|m| m.len()).unwrap_or(0);

            archives.push(ArchiveInfo {
                digest_hex: self.read_checksum(&name)?,
                name,
                created_at: parsed.created_at,
                size_bytes,
                encrypted: parsed.encrypted,
                includes_sensitive: parsed.includes_sensitive,
            });
        }

        archives.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.name.cmp(&a.name)));
        Ok(archives)
    }

    pub fn info(&self, name: &str) -> Result<ArchiveInfo> {
        let parsed = parse_archive_name(&self.prefix, name)?;
        let path = self.dir.join(name);
        let metadata = fs::metadata(&path).map_err(|e| not_found_or_io(e, name))?;
        Ok(ArchiveInfo {
            name: name.to_string(),
            created_at: parsed.created_at,
            size_bytes: metadata.len(),
            encrypted: parsed.encrypted,
            includes_sensitive: parsed.includes_sensitive,
            digest_hex: self.read_checksum(name)?,
        })
    }

    /// Read an archive, verifying it against its checksum sidecar.
    pub fn read(&self, name: &str) -> Result<StoredArchive> {
        let info = self.info(name)?;
        let bytes = fs::read(self.dir.join(name)).map_err(|e| not_found_or_io(e, name))?;

        let actual = crypto::digest(&bytes);
        match &info.digest_hex {
            Some(expected) if !crypto::constant_time_eq(expected.as_bytes(), actual.as_bytes()) => {
                return Err(EngineError::IntegrityMismatch {
                    name: name.to_string(),
                    expected: expected.clone(),
                    actual,
                });
            }
            Some(_) => {}
            None => warn!(archive = %name, "No checksum sidecar, integrity not verified"),
        }

        let encryption = if info.encrypted {
            let meta_path = self.dir.join(format!("{name}{METADATA_SUFFIX}"));
            let raw = fs::read(&meta_path).map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    EngineError::MissingEncryptionParams(format!("{name}{METADATA_SUFFIX} is missing"))
                }
                _ => EngineError::Io(e),
            })?;
            let meta: EncryptionMetadata = serde_json::from_slice(&raw)
                .map_err(|e| EngineError::MissingEncryptionParams(format!("unreadable metadata: {e}")))?;
            Some(meta)
        } else {
            None
        };

        Ok(StoredArchive {
            info,
            bytes,
            encryption,
        })
    }

    /// Delete an archive; sidecars are removed best-effort.
    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.path_of(name)?;
        fs::remove_file(&path).map_err(|e| not_found_or_io(e, name))?;
        remove_sidecars(&self.dir, name);
        info!(archive = %name, "Archive deleted");
        Ok(())
    }

    fn read_checksum(&self, name: &str) -> Result<Option<String>> {
        let path = self.dir.join(format!("{name}{CHECKSUM_SUFFIX}"));
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content.split_whitespace().next().map(str::to_string)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EngineError::Io(e)),
        }
    }
}

/// Remove `.sha256` and `.meta.json` next to `name`. A missing sidecar is
/// fine; any other failure is only logged.
pub(crate) fn remove_sidecars(dir: &Path, name: &str) {
    for suffix in [CHECKSUM_SUFFIX, METADATA_SUFFIX] {
        let sidecar = dir.join(format!("{name}{suffix}"));
        match fs::remove_file(&sidecar) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(sidecar = %sidecar.display(), error = %e, "Failed to remove sidecar"),
        }
    }
}

fn not_found_or_io(e: std::io::Error, name: &str) -> EngineError {
    match e.kind() {
        ErrorKind::NotFound => EngineError::ArchiveNotFound(name.to_string()),
        _ => EngineError::Io(e),
    }
}

/// Write to a hidden temp file, fsync, then rename into place.
fn write_atomic(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
    let tmp = dir.join(format!(".{name}.tmp"));
    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, dir.join(name))
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    Ok(result?)
}
