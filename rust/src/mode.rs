//! Deployment mode detection. Only `production` enables the strict policy;
//! every other mode may fall back to placeholders, loudly.

use std::fmt;

use crate::env::{EnvSource, RACK_ENV, RAILS_ENV};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentMode {
    Development,
    Test,
    Production,
    Custom(String),
}

impl DeploymentMode {
    /// Reads `RAILS_ENV`, then `RACK_ENV`, defaulting to development.
    pub fn from_env(env: &impl EnvSource) -> Self {
        let raw = env
            .non_empty(RAILS_ENV)
            .or_else(|| env.non_empty(RACK_ENV))
            .unwrap_or_else(|| "development".to_string());
        Self::parse(&raw)
    }

    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "development" => DeploymentMode::Development,
            "test" => DeploymentMode::Test,
            "production" => DeploymentMode::Production,
            other => DeploymentMode::Custom(other.to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, DeploymentMode::Production)
    }

    pub fn as_str(&self) -> &str {
        match self {
            DeploymentMode::Development => "development",
            DeploymentMode::Test => "test",
            DeploymentMode::Production => "production",
            DeploymentMode::Custom(name) => name,
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
