//! Startup-fatal error taxonomy for the bootstrap. Every variant names the
//! variable or setting at fault; none of them ever carries a secret value.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    #[error("required secret {var} is missing or empty in {mode} mode{hint}")]
    MissingSecret {
        var: &'static str,
        mode: String,
        hint: &'static str,
    },
    #[error("required secrets {} are missing or empty in {mode} mode", .vars.join(", "))]
    MissingSecrets {
        vars: Vec<&'static str>,
        mode: String,
    },
    #[error("{var} must be exactly {expected} bytes, got {actual}")]
    MalformedKey {
        var: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("conflicting encryption policy: {0}")]
    PolicyConflict(String),
    #[error("{var} is not a boolean: {value:?}")]
    InvalidFlag { var: &'static str, value: String },
    #[error("after-initialize phase ran before the before-initialize phase")]
    PhaseOrder,
}

impl BootstrapError {
    pub(crate) fn missing(var: &'static str, mode: &crate::mode::DeploymentMode) -> Self {
        BootstrapError::MissingSecret {
            var,
            mode: mode.to_string(),
            hint: "",
        }
    }

    /// Folds a second failure into this one so that startup reports every
    /// missing secret at once. Anything other than missing secrets keeps the
    /// first error.
    pub(crate) fn and(self, other: BootstrapError) -> Self {
        match (self, other) {
            (
                BootstrapError::MissingSecret { var, mode, .. },
                BootstrapError::MissingSecret { var: next, .. },
            ) => BootstrapError::MissingSecrets {
                vars: vec![var, next],
                mode,
            },
            (BootstrapError::MissingSecrets { mut vars, mode }, BootstrapError::MissingSecret { var, .. }) => {
                vars.push(var);
                BootstrapError::MissingSecrets { vars, mode }
            }
            (first, _) => first,
        }
    }

    /// Variables the error points at, in the order they were checked.
    pub fn variables(&self) -> Vec<&'static str> {
        match self {
            BootstrapError::MissingSecret { var, .. }
            | BootstrapError::MalformedKey { var, .. }
            | BootstrapError::InvalidFlag { var, .. } => vec![var],
            BootstrapError::MissingSecrets { vars, .. } => vars.clone(),
            BootstrapError::PolicyConflict(_) | BootstrapError::PhaseOrder => Vec::new(),
        }
    }

    pub fn names(&self, var: &str) -> bool {
        self.variables().contains(&var)
    }
}
