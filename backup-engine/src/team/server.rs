//! Server half: stores what clients send, compares verifiers in constant
//! time, and hands back opaque material.

use super::{
    decode_b64, decode_exact, decode_salt, EncryptedField, EnrollmentPayload, RotationRequest,
    TeamEncryptionConfig, TeamKdfParams, WrappedKeyBundle, FIELD_ALGORITHM, VERIFIER_LEN,
    WRAPPED_KEY_LEN,
};
use crate::config::TeamConfig;
use crate::crypto::{self, IV_LEN, TAG_LEN};
use crate::store::{Document, DocumentStore};
use crate::utils::errors::{EngineError, Result};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

pub const CONFIG_COLLECTION: &str = "teamencryptionconfigs";
pub const REPORT_COLLECTION: &str = "scoutingreports";
pub const ENCRYPTED_FIELD_KEY: &str = "encryptedSensitive";
pub const REPORT_TEAM_FIELD: &str = "team";
const STORED_VERIFIER_FIELD: &str = "passwordVerifierB64";

pub struct TeamEncryptionService {
    store: Arc<dyn DocumentStore>,
    policy: TeamConfig,
}

impl TeamEncryptionService {
    pub fn new(store: Arc<dyn DocumentStore>, policy: TeamConfig) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &TeamConfig {
        &self.policy
    }

    pub fn is_enrolled(&self, team_id: &str) -> Result<bool> {
        Ok(self.load(team_id)?.is_some())
    }

    pub fn enroll(&self, team_id: &str, payload: &EnrollmentPayload) -> Result<TeamKdfParams> {
        check_team_id(team_id)?;
        self.validate(payload)?;
        if payload.team_key_version != 1 {
            return Err(EngineError::InvalidTeamPayload(
                "teamKeyVersion must be 1 on first enrollment".into(),
            ));
        }
        if self.load(team_id)?.is_some() {
            return Err(EngineError::TeamAlreadyEnrolled(team_id.to_string()));
        }

        let now = Utc::now();
        let config = TeamEncryptionConfig {
            team_id: team_id.to_string(),
            kdf_salt_b64: payload.salt_b64.clone(),
            kdf_iterations: payload.iterations,
            password_verifier_b64: payload.verifier_b64.clone(),
            wrapped_team_key_b64: payload.wrapped_team_key_b64.clone(),
            team_key_version: payload.team_key_version,
            created_at: now,
            updated_at: now,
        };
        self.save(&config)?;
        info!(team_id, iterations = payload.iterations, "Team encryption enrolled");
        Ok(config.kdf_params())
    }

    pub fn kdf_params(&self, team_id: &str) -> Result<TeamKdfParams> {
        Ok(self.require(team_id)?.kdf_params())
    }

    /// Constant-time check of a client-derived verifier.
    pub fn verify(&self, team_id: &str, verifier_b64: &str) -> Result<bool> {
        let config = self.require(team_id)?;
        verifier_matches(&config.password_verifier_b64, verifier_b64)
    }

    /// Release the wrapped key, only to a caller holding the right verifier.
    pub fn unlock(&self, team_id: &str, verifier_b64: &str) -> Result<Option<WrappedKeyBundle>> {
        let config = self.require(team_id)?;
        if verifier_matches(&config.password_verifier_b64, verifier_b64)? {
            Ok(Some(config.wrapped_key()))
        } else {
            warn!(team_id, "Team unlock rejected");
            Ok(None)
        }
    }

    pub fn change_password(&self, team_id: &str, request: &RotationRequest) -> Result<TeamKdfParams> {
        let current = self.require(team_id)?;
        if !verifier_matches(&current.password_verifier_b64, &request.current_verifier_b64)? {
            warn!(team_id, "Password change rejected: current verifier mismatch");
            return Err(EngineError::WrongTeamPassword);
        }

        let payload = &request.payload;
        self.validate(payload)?;
        let expected = current.team_key_version + 1;
        if payload.team_key_version != expected {
            return Err(EngineError::StaleKeyVersion {
                expected,
                found: payload.team_key_version,
            });
        }

        let config = TeamEncryptionConfig {
            team_id: current.team_id,
            kdf_salt_b64: payload.salt_b64.clone(),
            kdf_iterations: payload.iterations,
            password_verifier_b64: payload.verifier_b64.clone(),
            wrapped_team_key_b64: payload.wrapped_team_key_b64.clone(),
            team_key_version: payload.team_key_version,
            created_at: current.created_at,
            updated_at: Utc::now(),
        };
        self.save(&config)?;
        info!(team_id, version = config.team_key_version, "Team password changed");
        Ok(config.kdf_params())
    }

    pub fn store_encrypted_field(&self, team_id: &str, report_id: &str, field: &EncryptedField) -> Result<()> {
        let config = self.require(team_id)?;
        validate_field(field, config.team_key_version)?;

        let mut report = self.owned_report(team_id, report_id)?;
        report.insert(ENCRYPTED_FIELD_KEY.to_string(), serde_json::to_value(field)?);
        self.store
            .upsert(REPORT_COLLECTION, report_id, report)
            .map_err(|e| EngineError::store(REPORT_COLLECTION, e))?;
        info!(team_id, report_id, version = field.version, "Encrypted report field stored");
        Ok(())
    }

    pub fn load_encrypted_field(&self, team_id: &str, report_id: &str) -> Result<Option<EncryptedField>> {
        let mut report = self.owned_report(team_id, report_id)?;
        match report.remove(ENCRYPTED_FIELD_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    fn owned_report(&self, team_id: &str, report_id: &str) -> Result<Document> {
        let report = self
            .store
            .get(REPORT_COLLECTION, report_id)
            .map_err(|e| EngineError::store(REPORT_COLLECTION, e))?
            .ok_or_else(|| EngineError::ReportNotFound(report_id.to_string()))?;

        // Reports of another team look exactly like missing ones.
        match report.get(REPORT_TEAM_FIELD).and_then(Value::as_str) {
            Some(owner) if owner == team_id => Ok(report),
            _ => Err(EngineError::ReportNotFound(report_id.to_string())),
        }
    }

    fn validate(&self, payload: &EnrollmentPayload) -> Result<()> {
        if payload.iterations < self.policy.min_iterations || payload.iterations > self.policy.max_iterations {
            return Err(EngineError::InvalidTeamPayload(format!(
                "iterations must be between {} and {}",
                self.policy.min_iterations, self.policy.max_iterations
            )));
        }
        decode_salt(&payload.salt_b64)?;
        decode_exact("verifierB64", &payload.verifier_b64, VERIFIER_LEN)?;
        decode_exact("wrappedTeamKeyB64", &payload.wrapped_team_key_b64, WRAPPED_KEY_LEN)?;
        Ok(())
    }

    fn load(&self, team_id: &str) -> Result<Option<TeamEncryptionConfig>> {
        let document = self
            .store
            .get(CONFIG_COLLECTION, team_id)
            .map_err(|e| EngineError::store(CONFIG_COLLECTION, e))?;
        let Some(document) = document else {
            return Ok(None);
        };
        // Without a verifier nobody can unlock, so the team may enroll again.
        let has_verifier = document
            .get(STORED_VERIFIER_FIELD)
            .and_then(Value::as_str)
            .is_some_and(|v| !v.is_empty());
        if !has_verifier {
            warn!(team_id, "Stored team config has no verifier, treating team as not enrolled");
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(Value::Object(document))?))
    }

    fn require(&self, team_id: &str) -> Result<TeamEncryptionConfig> {
        self.load(team_id)?
            .ok_or_else(|| EngineError::TeamNotEnrolled(team_id.to_string()))
    }

    fn save(&self, config: &TeamEncryptionConfig) -> Result<()> {
        let Value::Object(document) = serde_json::to_value(config)? else {
            return Err(EngineError::Crypto("team config did not serialize to an object".into()));
        };
        self.store
            .upsert(CONFIG_COLLECTION, &config.team_id, document)
            .map_err(|e| EngineError::store(CONFIG_COLLECTION, e))
    }
}

fn check_team_id(team_id: &str) -> Result<()> {
    if team_id.trim().is_empty() {
        return Err(EngineError::InvalidInput("team id cannot be empty".into()));
    }
    Ok(())
}

fn verifier_matches(stored_b64: &str, candidate_b64: &str) -> Result<bool> {
    let stored = decode_b64("passwordVerifierB64", stored_b64)
        .map_err(|_| EngineError::Crypto("stored verifier is corrupt".into()))?;

    match decode_b64("verifierB64", candidate_b64) {
        Ok(candidate) if candidate.len() == stored.len() => {
            Ok(crypto::constant_time_eq(&stored, &candidate))
        }
        // Same amount of work as a real comparison.
        _ => {
            let dummy = vec![0u8; stored.len()];
            let _ = crypto::constant_time_eq(&stored, &dummy);
            Ok(false)
        }
    }
}

fn validate_field(field: &EncryptedField, current_version: u32) -> Result<()> {
    if field.algorithm != FIELD_ALGORITHM {
        return Err(EngineError::InvalidTeamPayload(format!(
            "unsupported algorithm {}",
            field.algorithm
        )));
    }
    if field.version == 0 || field.version > current_version {
        return Err(EngineError::InvalidTeamPayload(format!(
            "version {} is not a key version of this team (current {current_version})",
            field.version
        )));
    }
    decode_exact("ivB64", &field.iv_b64, IV_LEN)?;
    let ciphertext = decode_b64("ciphertextB64", &field.ciphertext_b64)?;
    if ciphertext.len() <= TAG_LEN {
        return Err(EngineError::InvalidTeamPayload(
            "ciphertextB64 is too short to hold a tag".into(),
        ));
    }
    Ok(())
}
