//! Key derivation helpers. Subkeys for cookies, tokens and field encryption
//! are never the configured secrets themselves; they are expanded from them
//! with HKDF-SHA256 under a purpose-specific salt.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::secret::SecretString;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("hkdf expansion failed: {0}")]
    HkdfFailed(String),
    #[error("hmac failed: {0}")]
    HmacFailed(String),
}

type HmacSha256 = Hmac<Sha256>;

/// Derives key material using HKDF-SHA256.
pub fn hkdf_expand(
    input_key_material: &[u8],
    salt: &[u8],
    info: &[u8],
    length: usize,
) -> Result<Zeroizing<Vec<u8>>, KeyError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), input_key_material);
    let mut okm = Zeroizing::new(vec![0u8; length]);
    hk.expand(info, okm.as_mut_slice())
        .map_err(|e| KeyError::HkdfFailed(format!("{e}")))?;
    Ok(okm)
}

/// Generates an HMAC-SHA256 tag for the provided data.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], KeyError> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| KeyError::HmacFailed(format!("{e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Expands purpose-bound keys from a root secret such as the secret key base.
#[derive(Clone)]
pub struct KeyGenerator {
    root: SecretString,
}

impl KeyGenerator {
    const INFO: &'static [u8] = b"secret-bootstrap key generator";

    pub fn new(root: &SecretString) -> Self {
        Self { root: root.clone() }
    }

    /// Same root and salt always produce the same key.
    pub fn generate_key(&self, salt: &str, length: usize) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        hkdf_expand(self.root.as_bytes(), salt.as_bytes(), Self::INFO, length)
    }
}
