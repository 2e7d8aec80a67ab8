//! Completion events emitted by [`crate::service::BackupService`].

use crate::archive::ArchiveInfo;
use crate::retention::PruneReport;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreSummary {
    /// Archive name, or `upload` for an uploaded blob
    pub source: String,
    pub documents: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedArchive {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BackupEvent {
    #[serde(rename = "archive.created")]
    ArchiveCreated(ArchiveInfo),
    #[serde(rename = "archive.deleted")]
    ArchiveDeleted(DeletedArchive),
    #[serde(rename = "retention.completed")]
    RetentionCompleted(PruneReport),
    #[serde(rename = "restore.previewed")]
    RestorePreviewed(RestoreSummary),
    #[serde(rename = "restore.applied")]
    RestoreApplied(RestoreSummary),
}

impl BackupEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            BackupEvent::ArchiveCreated(_) => "archive.created",
            BackupEvent::ArchiveDeleted(_) => "archive.deleted",
            BackupEvent::RetentionCompleted(_) => "retention.completed",
            BackupEvent::RestorePreviewed(_) => "restore.previewed",
            BackupEvent::RestoreApplied(_) => "restore.applied",
        }
    }
}

/// Receives events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: BackupEvent);
}

pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: BackupEvent) {}
}

/// Writes each event to the log; used by the CLI.
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: BackupEvent) {
        info!(event = event.kind(), "Backup event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let event = BackupEvent::ArchiveDeleted(DeletedArchive {
            name: "backup-x.json.gz".into(),
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "archive.deleted", "payload": {"name": "backup-x.json.gz"}})
        );

        let event = BackupEvent::RestoreApplied(RestoreSummary {
            source: "upload".into(),
            documents: 3,
            inserted: 2,
            skipped: 1,
            warnings: 0,
        });
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.kind());
        assert_eq!(value["payload"]["inserted"], 2);
    }
}
