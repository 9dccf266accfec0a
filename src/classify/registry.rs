use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use super::backend::Classifier;
use super::session::{ClassifierLoader, ClassifierSession, SessionPolicy};

/// Registry of classifier loaders, keyed by backend name.
///
/// Loaders are stored rather than live classifiers: each session decides when a
/// handle is opened and released.
pub struct ClassifierRegistry {
    loaders: HashMap<String, ClassifierLoader>,
    default_name: Option<String>,
}

impl ClassifierRegistry {
    pub fn new() -> Self {
        Self {
            loaders: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a loader. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, loader: F)
    where
        F: Fn() -> Result<Box<dyn Classifier>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.loaders.insert(name.to_string(), Arc::new(loader));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.loaders.contains_key(name) {
            return Err(anyhow!("classifier backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn default_name(&self) -> Option<&str> {
        self.default_name.as_deref()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.loaders.contains_key(name)
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.loaders.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start a session on a named backend.
    pub fn session(&self, name: &str, policy: SessionPolicy) -> Result<ClassifierSession> {
        let loader = self
            .loaders
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("classifier backend '{}' not registered", name))?;
        Ok(ClassifierSession::new(name, loader, policy))
    }

    /// Start a session on the default backend.
    pub fn default_session(&self, policy: SessionPolicy) -> Result<ClassifierSession> {
        let name = self
            .default_name
            .clone()
            .ok_or_else(|| anyhow!("no classifier backend registered"))?;
        self.session(&name, policy)
    }
}

impl Default for ClassifierRegistry {
    fn default() -> Self {
        Self::new()
    }
}
