//! Secret key base and authentication secret resolution, run before the host
//! framework initializes.
//!
//! Fallback chain for the secret key base:
//! `SECRET_KEY_BASE` → `RAILS_MASTER_KEY` → development placeholder (never in
//! production). The authentication secret comes from `DEVISE_SECRET_KEY`; outside
//! production it may borrow the secret key base instead.

use serde::Serialize;
use tracing::{info, warn};

use crate::env::{EnvSource, DEVISE_SECRET_KEY, RAILS_MASTER_KEY, SECRET_KEY_BASE};
use crate::error::BootstrapError;
use crate::mode::DeploymentMode;
use crate::secret::SecretString;

/// Fixed stand-in used only when no secret key base is configured outside production.
pub const DEVELOPMENT_SECRET_KEY_BASE: &str =
    "insecure-development-secret-key-base-never-use-in-production";

/// Where a resolved secret came from. Recorded for logs and reports instead of the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecretSource {
    Environment,
    MasterKeyFallback,
    SecretKeyBaseFallback,
    DevelopmentPlaceholder,
}

impl SecretSource {
    pub fn is_placeholder(self) -> bool {
        matches!(self, SecretSource::DevelopmentPlaceholder)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretKeyBase {
    value: SecretString,
    source: SecretSource,
}

impl SecretKeyBase {
    pub fn resolve(env: &impl EnvSource, mode: &DeploymentMode) -> Result<Self, BootstrapError> {
        if let Some(value) = env.non_empty(SECRET_KEY_BASE) {
            info!(var = SECRET_KEY_BASE, %mode, "secret key base taken from environment");
            return Ok(Self::new(value, SecretSource::Environment));
        }
        if let Some(value) = env.non_empty(RAILS_MASTER_KEY) {
            info!(
                var = RAILS_MASTER_KEY,
                %mode,
                "SECRET_KEY_BASE unset; secret key base taken from master key"
            );
            return Ok(Self::new(value, SecretSource::MasterKeyFallback));
        }
        if mode.is_production() {
            return Err(BootstrapError::MissingSecret {
                var: SECRET_KEY_BASE,
                mode: mode.to_string(),
                hint: " (RAILS_MASTER_KEY is unset as well)",
            });
        }
        warn!(
            var = SECRET_KEY_BASE,
            %mode,
            "no secret key base configured; using the insecure development placeholder"
        );
        Ok(Self::new(
            DEVELOPMENT_SECRET_KEY_BASE,
            SecretSource::DevelopmentPlaceholder,
        ))
    }

    pub fn new(value: impl Into<String>, source: SecretSource) -> Self {
        Self {
            value: SecretString::new(value),
            source,
        }
    }

    pub fn secret(&self) -> &SecretString {
        &self.value
    }

    pub fn source(&self) -> SecretSource {
        self.source
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSecretKey {
    value: SecretString,
    source: SecretSource,
}

impl AuthSecretKey {
    /// In production a missing or empty `DEVISE_SECRET_KEY` aborts startup;
    /// elsewhere the secret key base is reused with a warning.
    pub fn resolve(
        env: &impl EnvSource,
        mode: &DeploymentMode,
        base: &SecretKeyBase,
    ) -> Result<Self, BootstrapError> {
        Ok(Self::from_env(env, mode)?.unwrap_or_else(|| Self::borrowed(base, mode)))
    }

    /// Reads `DEVISE_SECRET_KEY` alone. `Ok(None)` means unset outside
    /// production, where the caller falls back to the secret key base.
    pub fn from_env(
        env: &impl EnvSource,
        mode: &DeploymentMode,
    ) -> Result<Option<Self>, BootstrapError> {
        if let Some(value) = env.non_empty(DEVISE_SECRET_KEY) {
            info!(var = DEVISE_SECRET_KEY, %mode, "auth secret key taken from environment");
            return Ok(Some(Self {
                value: SecretString::new(value),
                source: SecretSource::Environment,
            }));
        }
        if mode.is_production() {
            return Err(BootstrapError::missing(DEVISE_SECRET_KEY, mode));
        }
        Ok(None)
    }

    fn borrowed(base: &SecretKeyBase, mode: &DeploymentMode) -> Self {
        warn!(
            var = DEVISE_SECRET_KEY,
            %mode,
            "auth secret key unset; reusing the secret key base"
        );
        Self {
            value: base.secret().clone(),
            source: SecretSource::SecretKeyBaseFallback,
        }
    }

    pub fn secret(&self) -> &SecretString {
        &self.value
    }

    pub fn source(&self) -> SecretSource {
        self.source
    }
}

/// Resolves both before-initialize secrets. Both are checked even when the
/// first fails, so the error names every missing variable.
pub fn resolve_early(
    env: &impl EnvSource,
    mode: &DeploymentMode,
) -> Result<(SecretKeyBase, AuthSecretKey), BootstrapError> {
    let base = SecretKeyBase::resolve(env, mode);
    let auth = AuthSecretKey::from_env(env, mode);
    match (base, auth) {
        (Ok(base), Ok(auth)) => {
            let auth = auth.unwrap_or_else(|| AuthSecretKey::borrowed(&base, mode));
            Ok((base, auth))
        }
        (Err(first), Err(second)) => Err(first.and(second)),
        (Err(err), Ok(_)) | (Ok(_), Err(err)) => Err(err),
    }
}
