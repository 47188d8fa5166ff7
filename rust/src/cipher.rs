//! Field-level encryption built on ChaCha20-Poly1305, keyed from the resolved
//! encryption key set. Encrypted values are stored as nonce + ciphertext + auth
//! tag, base64 encoded so they fit in a text column.
//!
//! Deterministic mode derives the nonce from an HMAC of the plaintext under a
//! dedicated nonce subkey, so equal plaintexts yield equal envelopes and can be
//! matched by equality queries.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use crate::encryption::{EncryptionState, KeyKind, KEY_LENGTH};
use crate::keys::hmac_sha256;

const TAG_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("invalid key length; expected 32 bytes")]
    InvalidKeyLength,
    #[error("deterministic nonce key must differ from the deterministic encryption key")]
    SharedNonceKey,
    #[error("key derivation failed: {0}")]
    DerivationFailed(String),
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),
    #[error("base64 decoding failed: {0}")]
    Base64DecodeFailed(String),
}

/// Serializable envelope for an encrypted attribute.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedField {
    pub nonce: String,
    pub ciphertext: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deterministic: bool,
}

/// Holds the cipher subkeys for the lifetime of the process.
pub struct FieldCipher {
    primary: Key,
    deterministic: Key,
    nonce_key: Key,
}

impl FieldCipher {
    /// Returns `None` when field encryption is inert.
    pub fn from_state(state: &EncryptionState) -> Result<Option<Self>, CipherError> {
        let Some(keys) = state.keys() else {
            return Ok(None);
        };
        let primary = keys
            .derive_key(KeyKind::Primary)
            .map_err(|e| CipherError::DerivationFailed(format!("{e}")))?;
        let deterministic = keys
            .derive_key(KeyKind::Deterministic)
            .map_err(|e| CipherError::DerivationFailed(format!("{e}")))?;
        let nonce_key = keys
            .derive_key(KeyKind::DeterministicNonce)
            .map_err(|e| CipherError::DerivationFailed(format!("{e}")))?;
        Self::from_key_bytes(&primary, &deterministic, &nonce_key).map(Some)
    }

    pub fn from_key_bytes(
        primary: &[u8],
        deterministic: &[u8],
        nonce_key: &[u8],
    ) -> Result<Self, CipherError> {
        if [primary, deterministic, nonce_key]
            .iter()
            .any(|key| key.len() != KEY_LENGTH)
        {
            return Err(CipherError::InvalidKeyLength);
        }
        if deterministic == nonce_key {
            return Err(CipherError::SharedNonceKey);
        }
        Ok(Self {
            primary: *Key::from_slice(primary),
            deterministic: *Key::from_slice(deterministic),
            nonce_key: *Key::from_slice(nonce_key),
        })
    }

    /// Encrypts with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedField, CipherError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        seal(&self.primary, &nonce, plaintext, false)
    }

    /// Encrypts so that the same plaintext always yields the same envelope.
    pub fn encrypt_deterministic(&self, plaintext: &[u8]) -> Result<EncryptedField, CipherError> {
        let mut digest = hmac_sha256(self.nonce_key.as_slice(), plaintext)
            .map_err(|e| CipherError::EncryptionFailed(format!("{e}")))?;
        let nonce = *Nonce::from_slice(&digest[..NONCE_SIZE]);
        digest.zeroize();
        seal(&self.deterministic, &nonce, plaintext, true)
    }

    pub fn decrypt(&self, field: &EncryptedField) -> Result<Vec<u8>, CipherError> {
        let nonce_bytes = decode(&field.nonce)?;
        let ciphertext = decode(&field.ciphertext)?;
        let tag = decode(&field.tag)?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CipherError::DecryptionFailed(
                "nonce length mismatch".to_string(),
            ));
        }

        let mut combined = Vec::with_capacity(ciphertext.len() + tag.len());
        combined.extend_from_slice(&ciphertext);
        combined.extend_from_slice(&tag);

        let key = if field.deterministic {
            &self.deterministic
        } else {
            &self.primary
        };
        ChaCha20Poly1305::new(key)
            .decrypt(Nonce::from_slice(&nonce_bytes), combined.as_ref())
            .map_err(|e| CipherError::DecryptionFailed(format!("{e}")))
    }
}

impl Drop for FieldCipher {
    fn drop(&mut self) {
        self.primary.as_mut_slice().zeroize();
        self.deterministic.as_mut_slice().zeroize();
        self.nonce_key.as_mut_slice().zeroize();
    }
}

fn seal(
    key: &Key,
    nonce: &Nonce,
    plaintext: &[u8],
    deterministic: bool,
) -> Result<EncryptedField, CipherError> {
    let mut ciphertext_and_tag = ChaCha20Poly1305::new(key)
        .encrypt(nonce, plaintext)
        .map_err(|e| CipherError::EncryptionFailed(format!("{e}")))?;
    if ciphertext_and_tag.len() < TAG_SIZE {
        return Err(CipherError::EncryptionFailed(
            "ciphertext shorter than authentication tag".to_string(),
        ));
    }
    let tag = ciphertext_and_tag.split_off(ciphertext_and_tag.len() - TAG_SIZE);

    Ok(EncryptedField {
        nonce: STANDARD_NO_PAD.encode(nonce),
        ciphertext: STANDARD_NO_PAD.encode(ciphertext_and_tag),
        tag: STANDARD_NO_PAD.encode(tag),
        deterministic,
    })
}

fn decode(encoded: &str) -> Result<Vec<u8>, CipherError> {
    STANDARD_NO_PAD
        .decode(encoded.as_bytes())
        .map_err(|e| CipherError::Base64DecodeFailed(format!("{e}")))
}

#[cfg(test)]
mod tests {
    use super::{CipherError, EncryptedField, FieldCipher, NONCE_SIZE};
    use crate::encryption::{EncryptionPolicy, EncryptionState, KeyKind, PolicySource};
    use crate::keys::hmac_sha256;
    use crate::env::MapEnv;
    use crate::mode::DeploymentMode;
    use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine};

    fn active_state() -> EncryptionState {
        let policy = EncryptionPolicy {
            enabled: true,
            source: PolicySource::Environment,
        };
        EncryptionState::resolve(&MapEnv::new(), &DeploymentMode::Test, policy)
            .expect("placeholders allowed in test mode")
    }

    fn cipher() -> FieldCipher {
        FieldCipher::from_state(&active_state())
            .expect("derivation should succeed")
            .expect("encryption is active")
    }

    #[test]
    fn inert_state_has_no_cipher() {
        let cipher = FieldCipher::from_state(&EncryptionState::Inert).expect("no derivation needed");
        assert!(cipher.is_none());
    }

    #[test]
    fn randomized_encryption_recovers_plaintext() {
        let cipher = cipher();
        let first = cipher.encrypt(b"guest@example.com").unwrap();
        let second = cipher.encrypt(b"guest@example.com").unwrap();
        assert_ne!(first, second);
        assert_eq!(cipher.decrypt(&first).unwrap(), b"guest@example.com");
    }

    #[test]
    fn deterministic_encryption_is_stable() {
        let cipher = cipher();
        let first = cipher.encrypt_deterministic(b"guest@example.com").unwrap();
        let second = cipher.encrypt_deterministic(b"guest@example.com").unwrap();
        let other = cipher.encrypt_deterministic(b"host@example.com").unwrap();
        assert_eq!(first, second);
        assert_ne!(first, other);
        assert!(first.deterministic);
        assert_eq!(cipher.decrypt(&first).unwrap(), b"guest@example.com");
    }

    #[test]
    fn deterministic_nonce_comes_from_its_own_key() {
        let state = active_state();
        let keys = state.keys().expect("encryption is active");
        let field = cipher().encrypt_deterministic(b"guest@example.com").unwrap();
        let nonce = STANDARD_NO_PAD.decode(field.nonce.as_bytes()).unwrap();

        let nonce_key = keys.derive_key(KeyKind::DeterministicNonce).unwrap();
        let expected = hmac_sha256(&nonce_key, b"guest@example.com").unwrap();
        assert_eq!(nonce, &expected[..NONCE_SIZE]);

        let encryption_key = keys.derive_key(KeyKind::Deterministic).unwrap();
        let shared = hmac_sha256(&encryption_key, b"guest@example.com").unwrap();
        assert_ne!(nonce, &shared[..NONCE_SIZE]);
    }

    #[test]
    fn rejects_tampered_envelopes() {
        let cipher = cipher();
        let mut field = cipher.encrypt(b"payload").unwrap();
        field.tag = STANDARD_NO_PAD.encode([0u8; 16]);
        let err = cipher.decrypt(&field).unwrap_err();
        assert!(format!("{err}").contains("decryption failed"));

        let bogus = EncryptedField {
            nonce: STANDARD_NO_PAD.encode([0u8; 4]),
            ciphertext: String::new(),
            tag: String::new(),
            deterministic: false,
        };
        assert!(cipher.decrypt(&bogus).is_err());
    }

    #[test]
    fn envelope_survives_json() {
        let cipher = cipher();
        let field = cipher.encrypt_deterministic(b"payload").unwrap();
        let json = serde_json::to_string(&field).unwrap();
        let parsed: EncryptedField = serde_json::from_str(&json).unwrap();
        assert_eq!(cipher.decrypt(&parsed).unwrap(), b"payload");
    }

    #[test]
    fn rejects_bad_key_lengths() {
        let err = FieldCipher::from_key_bytes(&[1u8; 16], &[1u8; 32], &[2u8; 32])
            .err()
            .unwrap();
        assert!(format!("{err}").contains("invalid key length"));

        let err = FieldCipher::from_key_bytes(&[1u8; 32], &[3u8; 32], &[3u8; 32])
            .err()
            .unwrap();
        assert!(matches!(err, CipherError::SharedNonceKey));
    }
}
