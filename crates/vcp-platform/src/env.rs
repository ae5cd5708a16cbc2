//! Environment variable access.

use std::collections::HashMap;

/// Read access to environment-style key/value configuration.
///
/// The process-wide layer of plugin config resolution goes through this
/// trait; tests substitute a [`MapEnvironment`].
pub trait Environment: Send + Sync {
    fn get_var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeEnvironment;

impl Environment for NativeEnvironment {
    fn get_var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A fixed in-memory environment.
#[derive(Debug, Default, Clone)]
pub struct MapEnvironment {
    vars: HashMap<String, String>,
}

impl MapEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapEnvironment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

impl Environment for MapEnvironment {
    fn get_var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_reads_path() {
        assert!(NativeEnvironment.get_var("PATH").is_some());
        assert!(NativeEnvironment.get_var("VCP_SURELY_UNSET_VARIABLE_9137").is_none());
    }

    #[test]
    fn map_environment_lookup() {
        let env = MapEnvironment::new().with("PORT", "6005");
        assert_eq!(env.get_var("PORT").as_deref(), Some("6005"));
        assert_eq!(env.get_var("port"), None);
    }

    #[test]
    fn map_environment_from_iter() {
        let env: MapEnvironment = [("A", "1"), ("B", "2")].into_iter().collect();
        assert_eq!(env.get_var("B").as_deref(), Some("2"));
    }
}
