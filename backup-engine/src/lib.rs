//! Backup Engine Library
//!
//! Datastore snapshots with integrity sidecars and optional at-rest
//! encryption, gated restore, retention pruning, and zero-knowledge team
//! encryption.

pub mod archive;
pub mod config;
pub mod crypto;
pub mod events;
pub mod restore;
pub mod retention;
pub mod schema;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod team;
pub mod utils;

// Re-export commonly used types
pub use archive::{ArchiveInfo, ArchiveStore};
pub use config::Config;
pub use events::{BackupEvent, EventSink};
pub use restore::{RestoreEngine, RestorePreview, RestoreReport};
pub use retention::{PruneReport, RetentionManager};
pub use service::{BackupOptions, BackupService, RestoreMode, RestoreOutcome};
pub use snapshot::{SnapshotDocument, SnapshotEngine};
pub use store::{Document, DocumentStore, MemoryStore};
pub use utils::errors::{EngineError, Result};
