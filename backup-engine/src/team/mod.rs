//! Zero-knowledge team encryption.
//!
//! The client half derives a verifier and a wrapping key from the team
//! password and keeps the team key to itself. The server half only ever sees
//! base64 verifiers, wrapped keys and opaque encrypted fields.

pub mod client;
pub mod server;

use crate::crypto::{IV_LEN, KEY_LEN, SALT_LEN, TAG_LEN};
use crate::utils::errors::{EngineError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use client::UnlockedTeam;
pub use server::TeamEncryptionService;

pub const DEFAULT_ITERATIONS: u32 = 100_000;
pub const FIELD_ALGORITHM: &str = "aes-256-gcm";
pub const VERIFIER_LEN: usize = 32;
/// `iv || wrapped key || tag`
pub const WRAPPED_KEY_LEN: usize = IV_LEN + KEY_LEN + TAG_LEN;

/// What a client sends when it enrolls or changes the team password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentPayload {
    pub salt_b64: String,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    pub verifier_b64: String,
    pub wrapped_team_key_b64: String,
    pub team_key_version: u32,
}

/// Password change: proof of the current password plus the new material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationRequest {
    pub current_verifier_b64: String,
    #[serde(flatten)]
    pub payload: EnrollmentPayload,
}

/// Public derivation parameters, enough to compute a verifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamKdfParams {
    pub salt_b64: String,
    pub iterations: u32,
    pub team_key_version: u32,
}

/// Released only after the verifier matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedKeyBundle {
    pub salt_b64: String,
    pub iterations: u32,
    pub wrapped_team_key_b64: String,
    pub team_key_version: u32,
}

impl WrappedKeyBundle {
    pub fn kdf_params(&self) -> TeamKdfParams {
        TeamKdfParams {
            salt_b64: self.salt_b64.clone(),
            iterations: self.iterations,
            team_key_version: self.team_key_version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedField {
    pub version: u32,
    pub algorithm: String,
    pub iv_b64: String,
    /// Ciphertext followed by the 16-byte tag.
    pub ciphertext_b64: String,
}

/// Stored in the `teamencryptionconfigs` collection, keyed by team id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamEncryptionConfig {
    #[serde(rename = "_id")]
    pub team_id: String,
    pub kdf_salt_b64: String,
    pub kdf_iterations: u32,
    pub password_verifier_b64: String,
    pub wrapped_team_key_b64: String,
    pub team_key_version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TeamEncryptionConfig {
    pub fn kdf_params(&self) -> TeamKdfParams {
        TeamKdfParams {
            salt_b64: self.kdf_salt_b64.clone(),
            iterations: self.kdf_iterations,
            team_key_version: self.team_key_version,
        }
    }

    pub fn wrapped_key(&self) -> WrappedKeyBundle {
        WrappedKeyBundle {
            salt_b64: self.kdf_salt_b64.clone(),
            iterations: self.kdf_iterations,
            wrapped_team_key_b64: self.wrapped_team_key_b64.clone(),
            team_key_version: self.team_key_version,
        }
    }
}

fn default_iterations() -> u32 {
    DEFAULT_ITERATIONS
}

pub(crate) fn encode_b64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode a wire field, naming it in the error.
pub(crate) fn decode_b64(field: &str, value: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|_| EngineError::InvalidTeamPayload(format!("{field} is not valid base64")))
}

pub(crate) fn decode_exact(field: &str, value: &str, len: usize) -> Result<Vec<u8>> {
    let bytes = decode_b64(field, value)?;
    if bytes.len() != len {
        return Err(EngineError::InvalidTeamPayload(format!(
            "{field} must decode to {len} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(bytes)
}

pub(crate) fn decode_salt(value: &str) -> Result<Vec<u8>> {
    let salt = decode_b64("saltB64", value)?;
    if salt.len() < SALT_LEN {
        return Err(EngineError::InvalidTeamPayload(format!(
            "saltB64 must decode to at least {SALT_LEN} bytes"
        )));
    }
    Ok(salt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rotation_request_wire_shape() {
        let request: RotationRequest = serde_json::from_value(json!({
            "currentVerifierB64": "AAAA",
            "saltB64": "c2FsdA==",
            "verifierB64": "dmVy",
            "wrappedTeamKeyB64": "d3JhcA==",
            "teamKeyVersion": 2
        }))
        .unwrap();
        assert_eq!(request.current_verifier_b64, "AAAA");
        assert_eq!(request.payload.iterations, DEFAULT_ITERATIONS);
        assert_eq!(request.payload.team_key_version, 2);
    }

    #[test]
    fn test_config_document_uses_underscore_id() {
        let now = Utc::now();
        let config = TeamEncryptionConfig {
            team_id: "t1".into(),
            kdf_salt_b64: "s".into(),
            kdf_iterations: 1000,
            password_verifier_b64: "v".into(),
            wrapped_team_key_b64: "w".into(),
            team_key_version: 1,
            created_at: now,
            updated_at: now,
        };
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["_id"], "t1");
        assert_eq!(value["passwordVerifierB64"], "v");
        assert!(value.get("teamId").is_none());
    }

    #[test]
    fn test_decode_exact_reports_field() {
        match decode_exact("verifierB64", &encode_b64(&[1, 2, 3]), VERIFIER_LEN) {
            Err(EngineError::InvalidTeamPayload(msg)) => assert!(msg.contains("verifierB64")),
            other => panic!("expected invalid payload, got {other:?}"),
        }
        assert!(decode_b64("saltB64", "%%%").is_err());
    }
}
