//! Field-level encryption policy and key set, resolved after the host
//! framework has initialized.
//!
//! One flag decides whether encryption is active: `ENCRYPTION_ENABLED`. A host
//! may also pin the decision in code, but a pin that disagrees with an explicit
//! environment value is rejected instead of letting whichever ran last win.

use serde::Serialize;
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::env::{
    EnvSource, ENCRYPTION_DETERMINISTIC_KEY, ENCRYPTION_ENABLED, ENCRYPTION_KEY_DERIVATION_SALT,
    ENCRYPTION_PRIMARY_KEY,
};
use crate::error::BootstrapError;
use crate::keys::{hkdf_expand, KeyError};
use crate::mode::DeploymentMode;
use crate::secret::SecretString;

/// Byte length the field cipher requires of every configured key.
pub const KEY_LENGTH: usize = 32;

pub const PLACEHOLDER_PRIMARY_KEY: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
pub const PLACEHOLDER_DETERMINISTIC_KEY: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
pub const PLACEHOLDER_KEY_DERIVATION_SALT: &str = "cccccccccccccccccccccccccccccccc";

/// Where the encryption decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicySource {
    Environment,
    Pinned,
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionPolicy {
    pub enabled: bool,
    pub source: PolicySource,
}

impl EncryptionPolicy {
    /// Settles the single encryption decision from the environment flag and an
    /// optional in-code pin. An absent flag with no pin means disabled.
    pub fn decide(env: &impl EnvSource, pinned: Option<bool>) -> Result<Self, BootstrapError> {
        let from_env = match env.non_empty(ENCRYPTION_ENABLED) {
            Some(raw) => Some(parse_flag(ENCRYPTION_ENABLED, &raw)?),
            None => None,
        };

        let policy = match (from_env, pinned) {
            (Some(env_value), Some(pin)) if env_value != pin => {
                return Err(BootstrapError::PolicyConflict(format!(
                    "{ENCRYPTION_ENABLED}={env_value} but encryption is pinned to {pin} in code"
                )));
            }
            (Some(enabled), _) => EncryptionPolicy {
                enabled,
                source: PolicySource::Environment,
            },
            (None, Some(enabled)) => EncryptionPolicy {
                enabled,
                source: PolicySource::Pinned,
            },
            (None, None) => {
                info!(var = ENCRYPTION_ENABLED, "flag unset; field encryption disabled");
                EncryptionPolicy {
                    enabled: false,
                    source: PolicySource::Default,
                }
            }
        };
        Ok(policy)
    }
}

fn parse_flag(var: &'static str, raw: &str) -> Result<bool, BootstrapError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(BootstrapError::InvalidFlag {
            var,
            value: raw.to_string(),
        }),
    }
}

/// Which configured key a subkey is expanded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Primary,
    Deterministic,
    /// Keys the HMAC that picks deterministic nonces; never used to encrypt.
    DeterministicNonce,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionKeySet {
    primary: SecretString,
    deterministic: SecretString,
    derivation_salt: SecretString,
    placeholders: Vec<&'static str>,
}

impl EncryptionKeySet {
    /// Reads all three keys. Supplied values must be exactly [`KEY_LENGTH`]
    /// bytes in every mode; missing values are fatal in production and replaced
    /// by the documented placeholders elsewhere.
    pub fn resolve(env: &impl EnvSource, mode: &DeploymentMode) -> Result<Self, BootstrapError> {
        let mut placeholders = Vec::new();
        let primary = resolve_key(
            env,
            mode,
            ENCRYPTION_PRIMARY_KEY,
            PLACEHOLDER_PRIMARY_KEY,
            &mut placeholders,
        )?;
        let deterministic = resolve_key(
            env,
            mode,
            ENCRYPTION_DETERMINISTIC_KEY,
            PLACEHOLDER_DETERMINISTIC_KEY,
            &mut placeholders,
        )?;
        let derivation_salt = resolve_key(
            env,
            mode,
            ENCRYPTION_KEY_DERIVATION_SALT,
            PLACEHOLDER_KEY_DERIVATION_SALT,
            &mut placeholders,
        )?;
        Ok(Self {
            primary,
            deterministic,
            derivation_salt,
            placeholders,
        })
    }

    pub fn primary(&self) -> &SecretString {
        &self.primary
    }

    pub fn deterministic(&self) -> &SecretString {
        &self.deterministic
    }

    pub fn derivation_salt(&self) -> &SecretString {
        &self.derivation_salt
    }

    /// Variables that were absent and replaced by placeholders.
    pub fn placeholders(&self) -> &[&'static str] {
        &self.placeholders
    }

    pub fn uses_placeholders(&self) -> bool {
        !self.placeholders.is_empty()
    }

    /// Expands a cipher subkey from the chosen key and the derivation salt.
    pub fn derive_key(&self, kind: KeyKind) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let (ikm, info): (&SecretString, &[u8]) = match kind {
            KeyKind::Primary => (&self.primary, &b"field encryption primary"[..]),
            KeyKind::Deterministic => (&self.deterministic, &b"field encryption deterministic"[..]),
            KeyKind::DeterministicNonce => (
                &self.deterministic,
                &b"field encryption deterministic nonce"[..],
            ),
        };
        hkdf_expand(
            ikm.as_bytes(),
            self.derivation_salt.as_bytes(),
            info,
            KEY_LENGTH,
        )
    }
}

fn resolve_key(
    env: &impl EnvSource,
    mode: &DeploymentMode,
    var: &'static str,
    placeholder: &'static str,
    placeholders: &mut Vec<&'static str>,
) -> Result<SecretString, BootstrapError> {
    match env.non_empty(var) {
        Some(value) if value.len() == KEY_LENGTH => Ok(SecretString::new(value)),
        Some(value) => Err(BootstrapError::MalformedKey {
            var,
            expected: KEY_LENGTH,
            actual: value.len(),
        }),
        None if mode.is_production() => Err(BootstrapError::missing(var, mode)),
        None => {
            warn!(var, %mode, "encryption key unset; using insecure placeholder");
            placeholders.push(var);
            Ok(SecretString::new(placeholder))
        }
    }
}

/// Final state of the field-encryption subsystem for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncryptionState {
    Inert,
    Active(EncryptionKeySet),
}

impl EncryptionState {
    pub fn resolve(
        env: &impl EnvSource,
        mode: &DeploymentMode,
        policy: EncryptionPolicy,
    ) -> Result<Self, BootstrapError> {
        if !policy.enabled {
            info!(source = ?policy.source, "field encryption inert");
            return Ok(EncryptionState::Inert);
        }
        let keys = EncryptionKeySet::resolve(env, mode)?;
        info!(
            source = ?policy.source,
            placeholders = keys.placeholders().len(),
            "field encryption active"
        );
        Ok(EncryptionState::Active(keys))
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, EncryptionState::Active(_))
    }

    pub fn keys(&self) -> Option<&EncryptionKeySet> {
        match self {
            EncryptionState::Active(keys) => Some(keys),
            EncryptionState::Inert => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::MapEnv;

    fn enabled() -> EncryptionPolicy {
        EncryptionPolicy {
            enabled: true,
            source: PolicySource::Environment,
        }
    }

    fn full_key_env() -> MapEnv {
        MapEnv::new()
            .with(ENCRYPTION_PRIMARY_KEY, &"p".repeat(32))
            .with(ENCRYPTION_DETERMINISTIC_KEY, &"d".repeat(32))
            .with(ENCRYPTION_KEY_DERIVATION_SALT, &"s".repeat(32))
    }

    #[test]
    fn parses_boolean_spellings() {
        for raw in ["1", "true", "TRUE", "yes", "on"] {
            let env = MapEnv::new().with(ENCRYPTION_ENABLED, raw);
            assert!(EncryptionPolicy::decide(&env, None).unwrap().enabled, "{raw}");
        }
        for raw in ["0", "false", "No", "off"] {
            let env = MapEnv::new().with(ENCRYPTION_ENABLED, raw);
            assert!(!EncryptionPolicy::decide(&env, None).unwrap().enabled, "{raw}");
        }
        let env = MapEnv::new().with(ENCRYPTION_ENABLED, "maybe");
        assert!(matches!(
            EncryptionPolicy::decide(&env, None),
            Err(BootstrapError::InvalidFlag { .. })
        ));
    }

    #[test]
    fn unset_flag_disables() {
        let policy = EncryptionPolicy::decide(&MapEnv::new(), None).unwrap();
        assert!(!policy.enabled);
        assert_eq!(policy.source, PolicySource::Default);
    }

    #[test]
    fn pin_must_agree_with_environment() {
        let env = MapEnv::new().with(ENCRYPTION_ENABLED, "true");
        assert!(matches!(
            EncryptionPolicy::decide(&env, Some(false)),
            Err(BootstrapError::PolicyConflict(_))
        ));
        let agreed = EncryptionPolicy::decide(&env, Some(true)).unwrap();
        assert_eq!(agreed.source, PolicySource::Environment);

        let pinned = EncryptionPolicy::decide(&MapEnv::new(), Some(true)).unwrap();
        assert!(pinned.enabled);
        assert_eq!(pinned.source, PolicySource::Pinned);
    }

    #[test]
    fn placeholders_outside_production() {
        let state = EncryptionState::resolve(&MapEnv::new(), &DeploymentMode::Development, enabled())
            .unwrap();
        let keys = state.keys().expect("active");
        assert_eq!(keys.primary().expose(), "a".repeat(32));
        assert_eq!(keys.deterministic().expose(), "b".repeat(32));
        assert_eq!(keys.derivation_salt().expose(), "c".repeat(32));
        for key in [keys.primary(), keys.deterministic(), keys.derivation_salt()] {
            assert_eq!(key.len(), KEY_LENGTH);
        }
        assert_eq!(keys.placeholders().len(), 3);
    }

    #[test]
    fn production_names_the_missing_key() {
        let mut env = full_key_env();
        env.remove(ENCRYPTION_DETERMINISTIC_KEY);
        let err = EncryptionState::resolve(&env, &DeploymentMode::Production, enabled()).unwrap_err();
        assert_eq!(err.variables(), vec![ENCRYPTION_DETERMINISTIC_KEY]);
        assert!(matches!(err, BootstrapError::MissingSecret { .. }));
    }

    #[test]
    fn wrong_length_rejected_in_every_mode() {
        let env = full_key_env().with(ENCRYPTION_KEY_DERIVATION_SALT, "short");
        for mode in [DeploymentMode::Development, DeploymentMode::Production] {
            let err = EncryptionState::resolve(&env, &mode, enabled()).unwrap_err();
            assert_eq!(
                err,
                BootstrapError::MalformedKey {
                    var: ENCRYPTION_KEY_DERIVATION_SALT,
                    expected: 32,
                    actual: 5,
                }
            );
        }
    }

    #[test]
    fn disabled_ignores_present_keys() {
        let env = full_key_env().with(ENCRYPTION_PRIMARY_KEY, "bogus");
        let policy = EncryptionPolicy {
            enabled: false,
            source: PolicySource::Environment,
        };
        let state = EncryptionState::resolve(&env, &DeploymentMode::Production, policy).unwrap();
        assert_eq!(state, EncryptionState::Inert);
        assert!(state.keys().is_none());
    }

    #[test]
    fn derived_subkeys_differ_by_kind() {
        let keys = EncryptionKeySet::resolve(&full_key_env(), &DeploymentMode::Production).unwrap();
        assert!(!keys.uses_placeholders());
        let primary = keys.derive_key(KeyKind::Primary).unwrap();
        let deterministic = keys.derive_key(KeyKind::Deterministic).unwrap();
        let nonce = keys.derive_key(KeyKind::DeterministicNonce).unwrap();
        assert_eq!(primary.len(), KEY_LENGTH);
        assert_eq!(nonce.len(), KEY_LENGTH);
        assert_ne!(*primary, *deterministic);
        assert_ne!(*deterministic, *nonce);
    }
}
