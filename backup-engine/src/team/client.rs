//! Client half: everything that touches the password or the team key.

use super::{
    decode_b64, decode_salt, encode_b64, EncryptedField, EnrollmentPayload, RotationRequest,
    TeamKdfParams, WrappedKeyBundle, FIELD_ALGORITHM, VERIFIER_LEN, WRAPPED_KEY_LEN,
};
use crate::crypto::{self, IV_LEN, KEY_LEN, SALT_LEN};
use crate::utils::errors::{EngineError, Result};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use std::fmt;
use zeroize::Zeroizing;

/// Verifier and wrapping key derived from one `(password, salt, iterations)`.
pub struct DerivedCredentials {
    verifier: [u8; VERIFIER_LEN],
    wrapping_key: Zeroizing<[u8; KEY_LEN]>,
}

impl DerivedCredentials {
    pub fn verifier_b64(&self) -> String {
        encode_b64(&self.verifier)
    }
}

/// PBKDF2-HMAC-SHA256 to 64 bytes: verifier first, wrapping key second.
pub fn derive_credentials(password: &str, salt: &[u8], iterations: u32) -> Result<DerivedCredentials> {
    if password.is_empty() {
        return Err(EngineError::InvalidInput("Team password cannot be empty".into()));
    }
    if iterations == 0 {
        return Err(EngineError::InvalidTeamPayload("iterations must be positive".into()));
    }

    let mut output = Zeroizing::new([0u8; VERIFIER_LEN + KEY_LEN]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut output[..]);

    let mut verifier = [0u8; VERIFIER_LEN];
    verifier.copy_from_slice(&output[..VERIFIER_LEN]);
    let mut wrapping_key = Zeroizing::new([0u8; KEY_LEN]);
    wrapping_key.copy_from_slice(&output[VERIFIER_LEN..]);

    Ok(DerivedCredentials {
        verifier,
        wrapping_key,
    })
}

/// A team key held in memory after a successful unlock.
pub struct UnlockedTeam {
    key: Zeroizing<[u8; KEY_LEN]>,
    version: u32,
}

impl fmt::Debug for UnlockedTeam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockedTeam")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl UnlockedTeam {
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn encrypt_field(&self, plaintext: &[u8]) -> Result<EncryptedField> {
        let (iv, ciphertext) = crypto::encrypt_with_key(&self.key[..], plaintext)?;
        Ok(EncryptedField {
            version: self.version,
            algorithm: FIELD_ALGORITHM.to_string(),
            iv_b64: encode_b64(&iv),
            ciphertext_b64: encode_b64(&ciphertext),
        })
    }

    pub fn decrypt_field(&self, field: &EncryptedField) -> Result<Vec<u8>> {
        if field.version != self.version {
            return Err(EngineError::KeyVersionMismatch {
                expected: self.version,
                found: field.version,
            });
        }
        if field.algorithm != FIELD_ALGORITHM {
            return Err(EngineError::InvalidTeamPayload(format!(
                "unsupported algorithm {}",
                field.algorithm
            )));
        }
        let iv = decode_b64("ivB64", &field.iv_b64)?;
        let ciphertext = decode_b64("ciphertextB64", &field.ciphertext_b64)?;
        crypto::decrypt_with_key(&self.key[..], &iv, &ciphertext)
    }

    fn wrap(&self, credentials: &DerivedCredentials) -> Result<String> {
        let (iv, wrapped) = crypto::encrypt_with_key(&credentials.wrapping_key[..], &self.key[..])?;
        let mut blob = Vec::with_capacity(WRAPPED_KEY_LEN);
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&wrapped);
        Ok(encode_b64(&blob))
    }
}

/// First password set: new salt, new team key, version 1.
pub fn enroll(password: &str, iterations: u32) -> Result<(EnrollmentPayload, UnlockedTeam)> {
    let salt = crypto::random_bytes::<SALT_LEN>();
    let credentials = derive_credentials(password, &salt, iterations)?;
    let team = UnlockedTeam {
        key: Zeroizing::new(crypto::random_bytes::<KEY_LEN>()),
        version: 1,
    };

    let payload = EnrollmentPayload {
        salt_b64: encode_b64(&salt),
        iterations,
        verifier_b64: credentials.verifier_b64(),
        wrapped_team_key_b64: team.wrap(&credentials)?,
        team_key_version: team.version,
    };
    Ok((payload, team))
}

/// What the client sends to verify or unlock.
pub fn derive_verifier(password: &str, params: &TeamKdfParams) -> Result<String> {
    let salt = decode_salt(&params.salt_b64)?;
    Ok(derive_credentials(password, &salt, params.iterations)?.verifier_b64())
}

/// Unwrap the team key locally. A wrong password fails closed.
pub fn unlock(password: &str, bundle: &WrappedKeyBundle) -> Result<UnlockedTeam> {
    let salt = decode_salt(&bundle.salt_b64)?;
    let credentials = derive_credentials(password, &salt, bundle.iterations)?;

    let blob = decode_b64("wrappedTeamKeyB64", &bundle.wrapped_team_key_b64)?;
    if blob.len() != WRAPPED_KEY_LEN {
        return Err(EngineError::InvalidTeamPayload(format!(
            "wrappedTeamKeyB64 must decode to {WRAPPED_KEY_LEN} bytes"
        )));
    }
    let (iv, wrapped) = blob.split_at(IV_LEN);
    let raw = Zeroizing::new(
        crypto::decrypt_with_key(&credentials.wrapping_key[..], iv, wrapped).map_err(|e| match e {
            EngineError::Decryption => EngineError::WrongTeamPassword,
            other => other,
        })?,
    );

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    key.copy_from_slice(&raw[..KEY_LEN]);
    Ok(UnlockedTeam {
        key,
        version: bundle.team_key_version,
    })
}

/// Re-wrap the same team key under a new password and fresh salt.
///
/// The returned request carries the old verifier as proof and bumps the key
/// version by one.
pub fn change_password(
    bundle: &WrappedKeyBundle,
    old_password: &str,
    new_password: &str,
    iterations: u32,
) -> Result<(RotationRequest, UnlockedTeam)> {
    let current = unlock(old_password, bundle)?;
    let current_verifier_b64 = derive_verifier(old_password, &bundle.kdf_params())?;

    let salt = crypto::random_bytes::<SALT_LEN>();
    let credentials = derive_credentials(new_password, &salt, iterations)?;
    let team = UnlockedTeam {
        key: current.key,
        version: bundle.team_key_version + 1,
    };

    let request = RotationRequest {
        current_verifier_b64,
        payload: EnrollmentPayload {
            salt_b64: encode_b64(&salt),
            iterations,
            verifier_b64: credentials.verifier_b64(),
            wrapped_team_key_b64: team.wrap(&credentials)?,
            team_key_version: team.version,
        },
    };
    Ok((request, team))
}
