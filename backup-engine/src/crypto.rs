//! Integrity and at-rest encryption primitives.
//!
//! Archives are hashed with SHA-256 and, when requested, sealed with
//! AES-256-GCM under a key stretched from the operator passphrase with
//! Argon2id. The same AEAD is used with raw team keys for per-report fields.

use crate::utils::errors::{EngineError, Result};
use aes_gcm::aead::{rand_core::RngCore, Aead, AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use argon2::{Algorithm, Argon2, Params, Version};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

pub const CIPHER_ALGORITHM: &str = "aes-256-gcm";
pub const ARCHIVE_KDF: &str = "argon2id";

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;
pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Lanes
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19_456,
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Output of [`encrypt`]. Only the passphrase is secret; everything here can
/// be stored next to the ciphertext.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub ciphertext: Vec<u8>,
    pub salt: [u8; SALT_LEN],
    pub iv: [u8; IV_LEN],
    pub tag: [u8; TAG_LEN],
    pub kdf: KdfParams,
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Fill an array from the OS CSPRNG.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Compare two byte strings without branching on their contents.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Stretch a passphrase into a 256-bit key with Argon2id.
pub fn derive_key(
    passphrase: &str,
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    if passphrase.is_empty() {
        return Err(EngineError::InvalidInput("Passphrase cannot be empty".into()));
    }

    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| EngineError::Crypto(format!("Invalid Argon2 parameters: {e}")))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key[..])
        .map_err(|e| EngineError::Crypto(format!("Argon2 key derivation failed: {e}")))?;

    Ok(key)
}

/// Encrypt with the default Argon2id cost.
pub fn encrypt(bytes: &[u8], passphrase: &str) -> Result<Sealed> {
    encrypt_with(bytes, passphrase, &KdfParams::default())
}

/// Encrypt with a fresh salt and nonce. Two calls never share either.
pub fn encrypt_with(bytes: &[u8], passphrase: &str, params: &KdfParams) -> Result<Sealed> {
    let salt = random_bytes::<SALT_LEN>();
    let iv = random_bytes::<IV_LEN>();
    let key = derive_key(passphrase, &salt, params)?;
    let cipher = cipher_for(&key[..])?;

    let mut buffer = bytes.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
        .map_err(|_| EngineError::Crypto("AES-GCM encryption failed".into()))?;

    let mut tag_bytes = [0u8; TAG_LEN];
    tag_bytes.copy_from_slice(tag.as_slice());

    Ok(Sealed {
        ciphertext: buffer,
        salt,
        iv,
        tag: tag_bytes,
        kdf: *params,
    })
}

/// Inverse of [`encrypt`]. Fails closed on any tag mismatch.
pub fn decrypt(sealed: &Sealed, passphrase: &str) -> Result<Vec<u8>> {
    let key = derive_key(passphrase, &sealed.salt, &sealed.kdf)?;
    let cipher = cipher_for(&key[..])?;

    let mut buffer = sealed.ciphertext.clone();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(&sealed.iv),
            b"",
            &mut buffer,
            Tag::from_slice(&sealed.tag),
        )
        .map_err(|_| EngineError::Decryption)?;

    Ok(buffer)
}

/// AES-256-GCM under a raw key. Returns `(iv, ciphertext || tag)`.
pub fn encrypt_with_key(key: &[u8], plaintext: &[u8]) -> Result<([u8; IV_LEN], Vec<u8>)> {
    let cipher = cipher_for(key)?;
    let iv = random_bytes::<IV_LEN>();
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| EngineError::Crypto("AES-GCM encryption failed".into()))?;
    Ok((iv, ciphertext))
}

/// Inverse of [`encrypt_with_key`].
pub fn decrypt_with_key(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if iv.len() != IV_LEN {
        return Err(EngineError::InvalidInput(format!(
            "IV must be {IV_LEN} bytes, got {}",
            iv.len()
        )));
    }
    if ciphertext.len() < TAG_LEN {
        return Err(EngineError::Decryption);
    }
    let cipher = cipher_for(key)?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| EngineError::Decryption)
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm> {
    Aes256Gcm::new_from_slice(key)
        .map_err(|_| EngineError::Crypto(format!("Key must be {KEY_LEN} bytes")))
}

/// Sidecar written next to an encrypted archive as `<name>.meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionMetadata {
    pub algorithm: String,
    pub kdf: String,
    #[serde(default)]
    pub kdf_params: KdfParams,
    pub salt_b64: String,
    pub iv_b64: String,
    pub auth_tag_b64: String,
    pub original_filename: String,
}

impl EncryptionMetadata {
    pub fn describe(sealed: &Sealed, original_filename: &str) -> Self {
        Self {
            algorithm: CIPHER_ALGORITHM.to_string(),
            kdf: ARCHIVE_KDF.to_string(),
            kdf_params: sealed.kdf,
            salt_b64: BASE64.encode(sealed.salt),
            iv_b64: BASE64.encode(sealed.iv),
            auth_tag_b64: BASE64.encode(sealed.tag),
            original_filename: original_filename.to_string(),
        }
    }

    /// Rebuild the sealed box for `ciphertext` from this sidecar.
    pub fn to_sealed(&self, ciphertext: Vec<u8>) -> Result<Sealed> {
        if self.algorithm != CIPHER_ALGORITHM {
            return Err(EngineError::MissingEncryptionParams(format!(
                "unsupported algorithm {}",
                self.algorithm
            )));
        }
        if self.kdf != ARCHIVE_KDF {
            return Err(EngineError::MissingEncryptionParams(format!(
                "unsupported kdf {}",
                self.kdf
            )));
        }

        Ok(Sealed {
            ciphertext,
            salt: decode_fixed("saltB64", &self.salt_b64)?,
            iv: decode_fixed("ivB64", &self.iv_b64)?,
            tag: decode_fixed("authTagB64", &self.auth_tag_b64)?,
            kdf: self.kdf_params,
        })
    }
}

fn decode_fixed<const N: usize>(field: &str, value: &str) -> Result<[u8; N]> {
    if value.is_empty() {
        return Err(EngineError::MissingEncryptionParams(format!("{field} is empty")));
    }
    let bytes = BASE64
        .decode(value)
        .map_err(|e| EngineError::MissingEncryptionParams(format!("{field}: {e}")))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        EngineError::MissingEncryptionParams(format!("{field} must be {N} bytes, got {}", b.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // Keeps Argon2 fast under the debug profile.
    const FAST: KdfParams = KdfParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    };

    #[test]
    fn test_digest_known_vector() {
        assert_eq!(
            digest(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_round_trip() {
        let data = b"{\"users\":[{\"_id\":\"u1\"}]}";
        let sealed = encrypt_with(data, "correct horse", &FAST).unwrap();
        assert_ne!(sealed.ciphertext.as_slice(), data.as_slice());
        assert_eq!(decrypt(&sealed, "correct horse").unwrap(), data);
    }

    #[test]
    fn test_round_trip_empty_payload() {
        let sealed = encrypt_with(b"", "pw", &FAST).unwrap();
        assert!(decrypt(&sealed, "pw").unwrap().is_empty());
    }

    #[test]
    fn test_salt_and_iv_are_fresh() {
        let a = encrypt_with(b"same bytes", "pw", &FAST).unwrap();
        let b = encrypt_with(b"same bytes", "pw", &FAST).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut sealed = encrypt_with(b"payload to protect", "pw", &FAST).unwrap();
        sealed.ciphertext[3] ^= 0x01;
        assert!(matches!(decrypt(&sealed, "pw"), Err(EngineError::Decryption)));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let mut sealed = encrypt_with(b"payload to protect", "pw", &FAST).unwrap();
        sealed.tag[0] ^= 0x80;
        assert!(matches!(decrypt(&sealed, "pw"), Err(EngineError::Decryption)));
    }

    #[test]
    fn test_tampered_iv_fails() {
        let mut sealed = encrypt_with(b"payload to protect", "pw", &FAST).unwrap();
        sealed.iv[11] ^= 0x01;
        assert!(matches!(decrypt(&sealed, "pw"), Err(EngineError::Decryption)));
    }

    #[test]
    fn test_tampered_salt_fails() {
        let mut sealed = encrypt_with(b"payload to protect", "pw", &FAST).unwrap();
        sealed.salt[0] ^= 0x01;
        assert!(matches!(decrypt(&sealed, "pw"), Err(EngineError::Decryption)));
    }

    #[test]
    fn test_wrong_passphrase_fails() {
        let sealed = encrypt_with(b"payload", "right", &FAST).unwrap();
        assert!(matches!(decrypt(&sealed, "wrong"), Err(EngineError::Decryption)));
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        assert!(matches!(
            encrypt_with(b"payload", "", &FAST),
            Err(EngineError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_metadata_round_trip() {
        let sealed = encrypt_with(b"archive bytes", "pw", &FAST).unwrap();
        let meta = EncryptionMetadata::describe(&sealed, "backup-x.json.gz");
        assert_eq!(meta.algorithm, "aes-256-gcm");
        assert_eq!(meta.kdf, "argon2id");

        let json = serde_json::to_string(&meta).unwrap();
        assert!(json.contains("saltB64"));
        assert!(json.contains("authTagB64"));

        let parsed: EncryptionMetadata = serde_json::from_str(&json).unwrap();
        let rebuilt = parsed.to_sealed(sealed.ciphertext.clone()).unwrap();
        assert_eq!(decrypt(&rebuilt, "pw").unwrap(), b"archive bytes");
    }

    #[test]
    fn test_metadata_missing_iv() {
        let sealed = encrypt_with(b"archive bytes", "pw", &FAST).unwrap();
        let mut meta = EncryptionMetadata::describe(&sealed, "x");
        meta.iv_b64 = String::new();
        assert!(matches!(
            meta.to_sealed(sealed.ciphertext),
            Err(EngineError::MissingEncryptionParams(_))
        ));
    }

    #[test]
    fn test_metadata_defaults_kdf_params() {
        let json = r#"{"algorithm":"aes-256-gcm","kdf":"argon2id","saltB64":"AAAAAAAAAAAAAAAAAAAAAA==","ivB64":"AAAAAAAAAAAAAAAA","authTagB64":"AAAAAAAAAAAAAAAAAAAAAA==","originalFilename":"a"}"#;
        let meta: EncryptionMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.kdf_params, KdfParams::default());
        assert!(meta.to_sealed(Vec::new()).is_ok());
    }

    #[test]
    fn test_raw_key_round_trip_and_tamper() {
        let key = random_bytes::<KEY_LEN>();
        let (iv, mut ciphertext) = encrypt_with_key(&key, b"scouting notes").unwrap();
        assert_eq!(decrypt_with_key(&key, &iv, &ciphertext).unwrap(), b"scouting notes");

        ciphertext[0] ^= 0xff;
        assert!(matches!(
            decrypt_with_key(&key, &iv, &ciphertext),
            Err(EngineError::Decryption)
        ));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abcdef", b"abcdef"));
        assert!(!constant_time_eq(b"abcdef", b"abcdeg"));
        assert!(!constant_time_eq(b"abcdef", b"xbcdef"));
        assert!(!constant_time_eq(b"abc", b"abcdef"));
    }
}
