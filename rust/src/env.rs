//! Environment access for the bootstrap. Resolution is a pure function of the
//! variables exposed through [`EnvSource`], so tests and embedders can hand in
//! an in-memory map instead of touching the process environment.

use std::collections::HashMap;

pub const RAILS_ENV: &str = "RAILS_ENV";
pub const RACK_ENV: &str = "RACK_ENV";
pub const RAILS_MASTER_KEY: &str = "RAILS_MASTER_KEY";
pub const SECRET_KEY_BASE: &str = "SECRET_KEY_BASE";
pub const DEVISE_SECRET_KEY: &str = "DEVISE_SECRET_KEY";
pub const ENCRYPTION_ENABLED: &str = "ENCRYPTION_ENABLED";
pub const ENCRYPTION_PRIMARY_KEY: &str = "ACTIVE_RECORD_ENCRYPTION_PRIMARY_KEY";
pub const ENCRYPTION_DETERMINISTIC_KEY: &str = "ACTIVE_RECORD_ENCRYPTION_DETERMINISTIC_KEY";
pub const ENCRYPTION_KEY_DERIVATION_SALT: &str = "ACTIVE_RECORD_ENCRYPTION_KEY_DERIVATION_SALT";

/// Read-only view over named string variables.
pub trait EnvSource {
    fn get(&self, name: &str) -> Option<String>;

    /// Returns the variable only when it holds something besides whitespace.
    /// Blank values are treated exactly like unset ones; anything else is
    /// returned untrimmed.
    fn non_empty(&self, name: &str) -> Option<String> {
        self.get(name).filter(|value| !value.trim().is_empty())
    }
}

/// Reads from the real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, name: &str) -> Option<String> {
        // Non-UTF-8 values are unusable as secrets; treat them as unset.
        std::env::var(name).ok()
    }
}

/// In-memory environment.
#[derive(Debug, Default, Clone)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: &str) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.vars.insert(name.to_string(), value.to_string());
    }

    pub fn remove(&mut self, name: &str) {
        self.vars.remove(name);
    }
}

impl<K, V> FromIterator<(K, V)> for MapEnv
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl EnvSource for MapEnv {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

impl<T: EnvSource + ?Sized> EnvSource for &T {
    fn get(&self, name: &str) -> Option<String> {
        (**self).get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::{EnvSource, MapEnv, SECRET_KEY_BASE};

    #[test]
    fn empty_values_count_as_unset() {
        let env = MapEnv::new().with(SECRET_KEY_BASE, "");
        assert_eq!(env.get(SECRET_KEY_BASE).as_deref(), Some(""));
        assert!(env.non_empty(SECRET_KEY_BASE).is_none());
    }

    #[test]
    fn blank_values_count_as_unset() {
        let env = MapEnv::new()
            .with("SPACES", "   ")
            .with("NEWLINE", "\n")
            .with("PADDED", " key ");
        assert!(env.non_empty("SPACES").is_none());
        assert!(env.non_empty("NEWLINE").is_none());
        assert_eq!(env.non_empty("PADDED").as_deref(), Some(" key "));
    }

    #[test]
    fn collects_from_pairs() {
        let env: MapEnv = [("A", "1"), ("B", "2")].into_iter().collect();
        assert_eq!(env.non_empty("B").as_deref(), Some("2"));
        assert!(env.get("C").is_none());
    }
}
