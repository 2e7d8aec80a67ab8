//! Error types for the backup engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    // Configuration
    #[error("Not configured: {0}")]
    NotConfigured(String),

    #[error("Restore is disabled in this environment")]
    RestoreDisabled,

    // Input validation
    #[error("Malformed backup: {0}")]
    MalformedBackup(String),

    #[error("Invalid archive filename: {0}")]
    InvalidFilename(String),

    #[error("Missing encryption parameters: {0}")]
    MissingEncryptionParams(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid team encryption payload: {0}")]
    InvalidTeamPayload(String),

    // Cryptographic verification
    #[error("Decryption failed: authentication tag mismatch")]
    Decryption,

    #[error("Integrity check failed for {name}: expected {expected}, got {actual}")]
    IntegrityMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Team password is incorrect")]
    WrongTeamPassword,

    #[error("Key version mismatch: field has version {found}, key is version {expected}")]
    KeyVersionMismatch { expected: u32, found: u32 },

    // Lookups and conflicts
    #[error("Archive not found: {0}")]
    ArchiveNotFound(String),

    #[error("Archive already exists: {0}")]
    AlreadyExists(String),

    #[error("Team {0} has no encryption configured")]
    TeamNotEnrolled(String),

    #[error("Report not found: {0}")]
    ReportNotFound(String),

    #[error("Team {0} already has encryption configured")]
    TeamAlreadyEnrolled(String),

    #[error("Stale key version: expected {expected}, got {found}")]
    StaleKeyVersion { expected: u32, found: u32 },

    // Internal
    #[error("Store error in collection {collection}: {source}")]
    Store {
        collection: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn store(collection: &str, source: anyhow::Error) -> Self {
        EngineError::Store {
            collection: collection.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
