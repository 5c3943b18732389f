use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::{PipelineError, Result};

use super::backend::Predictor;

/// Thread-safe registry of predictor backends.
///
/// Backends are wrapped in `Mutex` because `Predictor::predict` takes `&mut self`.
pub struct PredictorRegistry {
    backends: HashMap<String, Arc<Mutex<dyn Predictor>>>,
    default_name: Option<String>,
}

impl PredictorRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry with the built-in backends.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(super::LumaPredictor::new());
        registry
    }

    /// Register a backend. The first registered backend becomes the default.
    pub fn register<P: Predictor + 'static>(&mut self, backend: P) {
        let name = backend.name().to_string();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.backends.insert(name, Arc::new(Mutex::new(backend)));
    }

    /// Get backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<Mutex<dyn Predictor>>> {
        self.backends.get(name).cloned()
    }

    /// Get default backend.
    pub fn default_backend(&self) -> Option<Arc<Mutex<dyn Predictor>>> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// Resolve a backend by name, or the default when `name` is `None`.
    pub fn resolve(&self, name: Option<&str>) -> Result<Arc<Mutex<dyn Predictor>>> {
        match name {
            Some(name) => self.get(name).ok_or_else(|| {
                PipelineError::config(format!(
                    "predictor '{}' not registered (available: {})",
                    name,
                    self.list().join(", ")
                ))
            }),
            None => self
                .default_backend()
                .ok_or_else(|| PipelineError::config("no predictor registered")),
        }
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for PredictorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
