//! Run-once startup pipeline.
//!
//! ```text
//! host framework                      Bootstrap
//! ──────────────                      ─────────
//! before-initialize hook ──────────▶  before_initialize()  mode, secret key base, auth key
//! (framework loads)
//! after-initialize hook  ──────────▶  after_initialize()   encryption policy + key set
//!                                          │
//!                                          ▼
//!                                     ResolvedSecrets (immutable, process-wide)
//! ```
//!
//! Each phase is set-once: repeating it returns what was already resolved and
//! never re-reads the environment. Any error aborts startup.

use std::sync::OnceLock;

use serde::Serialize;
use tracing::{debug, info};

use crate::encryption::{EncryptionPolicy, EncryptionState, PolicySource};
use crate::env::EnvSource;
use crate::error::BootstrapError;
use crate::mode::DeploymentMode;
use crate::secrets::{resolve_early, AuthSecretKey, SecretKeyBase, SecretSource};

/// Values settled by the before-initialize phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EarlySecrets {
    pub mode: DeploymentMode,
    pub secret_key_base: SecretKeyBase,
    pub auth_secret_key: AuthSecretKey,
}

/// The final tuple handed to session signing, credential verification and
/// the field-encryption layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSecrets {
    pub mode: DeploymentMode,
    pub secret_key_base: SecretKeyBase,
    pub auth_secret_key: AuthSecretKey,
    pub policy: EncryptionPolicy,
    pub encryption: EncryptionState,
}

impl ResolvedSecrets {
    pub fn encryption_enabled(&self) -> bool {
        self.encryption.is_enabled()
    }

    /// Summary safe to print or log: sources and flags, never values.
    pub fn report(&self) -> BootstrapReport {
        BootstrapReport {
            mode: self.mode.to_string(),
            secret_key_base: self.secret_key_base.source(),
            auth_secret_key: self.auth_secret_key.source(),
            encryption_enabled: self.encryption.is_enabled(),
            encryption_policy: self.policy.source,
            placeholder_keys: self
                .encryption
                .keys()
                .map(|keys| keys.placeholders().to_vec())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapReport {
    pub mode: String,
    pub secret_key_base: SecretSource,
    pub auth_secret_key: SecretSource,
    pub encryption_enabled: bool,
    pub encryption_policy: PolicySource,
    pub placeholder_keys: Vec<&'static str>,
}

pub struct Bootstrap<E> {
    env: E,
    pinned: Option<bool>,
    early: Option<EarlySecrets>,
    resolved: Option<ResolvedSecrets>,
}

impl<E: EnvSource> Bootstrap<E> {
    pub fn new(env: E) -> Self {
        Self {
            env,
            pinned: None,
            early: None,
            resolved: None,
        }
    }

    /// Fixes the encryption decision in code. The environment flag may repeat
    /// it but never contradict it, and neither may a second pin.
    pub fn pin_encryption(&mut self, enabled: bool) -> Result<(), BootstrapError> {
        if let Some(existing) = self.pinned {
            if existing != enabled {
                return Err(BootstrapError::PolicyConflict(format!(
                    "encryption pinned to {existing} and then to {enabled}"
                )));
            }
        }
        if let Some(resolved) = &self.resolved {
            if resolved.policy.enabled != enabled {
                return Err(BootstrapError::PolicyConflict(format!(
                    "encryption already resolved as {} before a pin to {enabled}",
                    resolved.policy.enabled
                )));
            }
        }
        self.pinned = Some(enabled);
        Ok(())
    }

    pub fn before_initialize(&mut self) -> Result<&EarlySecrets, BootstrapError> {
        if self.early.is_some() {
            debug!("before-initialize phase already ran; keeping resolved secrets");
        } else {
            let mode = DeploymentMode::from_env(&self.env);
            let (secret_key_base, auth_secret_key) = resolve_early(&self.env, &mode)?;
            info!(
                %mode,
                secret_key_base = ?secret_key_base.source(),
                auth_secret_key = ?auth_secret_key.source(),
                "before-initialize phase complete"
            );
            self.early = Some(EarlySecrets {
                mode,
                secret_key_base,
                auth_secret_key,
            });
        }
        self.early.as_ref().ok_or(BootstrapError::PhaseOrder)
    }

    pub fn after_initialize(&mut self) -> Result<&ResolvedSecrets, BootstrapError> {
        let Some(early) = &self.early else {
            return Err(BootstrapError::PhaseOrder);
        };
        if self.resolved.is_some() {
            debug!("after-initialize phase already ran; keeping resolved encryption state");
        } else {
            let policy = EncryptionPolicy::decide(&self.env, self.pinned)?;
            let encryption = EncryptionState::resolve(&self.env, &early.mode, policy)?;
            info!(
                mode = %early.mode,
                encryption_enabled = encryption.is_enabled(),
                "after-initialize phase complete"
            );
            self.resolved = Some(ResolvedSecrets {
                mode: early.mode.clone(),
                secret_key_base: early.secret_key_base.clone(),
                auth_secret_key: early.auth_secret_key.clone(),
                policy,
                encryption,
            });
        }
        self.resolved.as_ref().ok_or(BootstrapError::PhaseOrder)
    }

    /// Runs both phases in order and hands back the final tuple.
    pub fn run(mut self) -> Result<ResolvedSecrets, BootstrapError> {
        self.before_initialize()?;
        self.after_initialize()?;
        self.resolved.take().ok_or(BootstrapError::PhaseOrder)
    }
}

static RESOLVED: OnceLock<ResolvedSecrets> = OnceLock::new();

/// Resolves once per process and publishes the result. Later calls return the
/// published tuple without looking at `env` again.
pub fn install(env: impl EnvSource) -> Result<&'static ResolvedSecrets, BootstrapError> {
    if let Some(resolved) = RESOLVED.get() {
        debug!("secrets already installed for this process");
        return Ok(resolved);
    }
    let resolved = Bootstrap::new(env).run()?;
    Ok(RESOLVED.get_or_init(|| resolved))
}

/// The installed tuple, if startup has completed.
pub fn resolved() -> Option<&'static ResolvedSecrets> {
    RESOLVED.get()
}
