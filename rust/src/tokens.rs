//! Authentication token digests keyed from the auth secret key.
//!
//! Raw tokens go to the user (reset links, confirmation mails); only the
//! digest is stored. The HMAC key is derived per purpose, so a digest made for
//! password resets never validates as a confirmation token.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::keys::{hmac_sha256, to_hex, KeyError, KeyGenerator};
use crate::secrets::AuthSecretKey;

const TOKEN_BYTES: usize = 15;
const DIGEST_KEY_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token key derivation failed: {0}")]
    Key(#[from] KeyError),
}

pub struct TokenGenerator {
    keys: KeyGenerator,
}

impl TokenGenerator {
    pub fn new(secret: &AuthSecretKey) -> Self {
        Self {
            keys: KeyGenerator::new(secret.secret()),
        }
    }

    /// Hex HMAC-SHA256 of `raw` under the key for `purpose`.
    pub fn digest(&self, purpose: &str, raw: &str) -> Result<String, TokenError> {
        let key = self
            .keys
            .generate_key(&format!("auth token {purpose}"), DIGEST_KEY_LEN)?;
        let tag = hmac_sha256(&key, raw.as_bytes())?;
        Ok(to_hex(&tag))
    }

    /// Returns a fresh raw token with its digest.
    pub fn generate(&self, purpose: &str) -> Result<(String, String), TokenError> {
        let raw = friendly_token();
        let digest = self.digest(purpose, &raw)?;
        Ok((raw, digest))
    }
}

/// 20 URL-safe characters with the easily confused `l`, `I`, `O` and `0` swapped out.
pub fn friendly_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD
        .encode(bytes)
        .chars()
        .map(|c| match c {
            'l' => 's',
            'I' => 'x',
            'O' => 'y',
            '0' => 'z',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{friendly_token, TokenGenerator};
    use crate::env::{MapEnv, DEVISE_SECRET_KEY};
    use crate::mode::DeploymentMode;
    use crate::secrets::{AuthSecretKey, SecretKeyBase, SecretSource};

    fn generator(secret: &str) -> TokenGenerator {
        let env = MapEnv::new().with(DEVISE_SECRET_KEY, secret);
        let base = SecretKeyBase::new("unused", SecretSource::Environment);
        let auth = AuthSecretKey::resolve(&env, &DeploymentMode::Production, &base).unwrap();
        TokenGenerator::new(&auth)
    }

    #[test]
    fn digests_are_stable_for_the_same_secret() {
        let a = generator("devise-secret").digest("reset_password", "tok").unwrap();
        let b = generator("devise-secret").digest("reset_password", "tok").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn digests_depend_on_purpose_and_secret() {
        let tokens = generator("devise-secret");
        let reset = tokens.digest("reset_password", "tok").unwrap();
        let confirm = tokens.digest("confirmation", "tok").unwrap();
        let rotated = generator("other-secret").digest("reset_password", "tok").unwrap();
        assert_ne!(reset, confirm);
        assert_ne!(reset, rotated);
    }

    #[test]
    fn generated_tokens_verify() {
        let tokens = generator("devise-secret");
        let (raw, digest) = tokens.generate("unlock").unwrap();
        assert_eq!(raw.len(), 20);
        assert_eq!(tokens.digest("unlock", &raw).unwrap(), digest);
    }

    #[test]
    fn friendly_tokens_avoid_ambiguous_characters() {
        for _ in 0..50 {
            let token = friendly_token();
            assert!(!token.contains(&['l', 'I', 'O', '0'][..]), "{token}");
        }
    }
}
