use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{PipelineError, Result};
use crate::predict::PredictorRegistry;

use super::{Block, CaptionBlock, ClassifyBlock, StageSpec, TrackBlock};

type Factory = Box<dyn Fn(&StageSpec) -> Result<Box<dyn Block>> + Send + Sync>;

/// Startup-time map from implementation identifier to block factory.
pub struct BlockRegistry {
    factories: HashMap<String, Factory>,
}

impl BlockRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in blocks. `classify` picks its predictor by
    /// the stage's `predictor` parameter, or the registry default.
    pub fn builtin(predictors: Arc<PredictorRegistry>) -> Self {
        let mut registry = Self::new();
        registry.register("classify", move |spec| {
            let name = spec.param::<String>("predictor")?;
            let predictor = predictors.resolve(name.as_deref())?;
            Ok(Box::new(ClassifyBlock::from_spec(spec, predictor)?) as Box<dyn Block>)
        });
        registry.register("caption", |spec| {
            Ok(Box::new(CaptionBlock::from_spec(spec)?) as Box<dyn Block>)
        });
        registry.register("track", |spec| {
            Ok(Box::new(TrackBlock::from_spec(spec)?) as Box<dyn Block>)
        });
        registry
    }

    pub fn register<F>(&mut self, module: &str, factory: F)
    where
        F: Fn(&StageSpec) -> Result<Box<dyn Block>> + Send + Sync + 'static,
    {
        self.factories.insert(module.to_string(), Box::new(factory));
    }

    /// Instantiate the block named by `spec.module`. Every failure names the
    /// stage.
    pub fn build(&self, spec: &StageSpec) -> Result<Box<dyn Block>> {
        let factory = self.factories.get(&spec.module).ok_or_else(|| {
            PipelineError::config(format!(
                "stage '{}': unknown module '{}' (available: {})",
                spec.name,
                spec.module,
                self.modules().join(", ")
            ))
        })?;
        factory(spec).map_err(|e| {
            let message = match e {
                PipelineError::Configuration { message } => message,
                other => other.to_string(),
            };
            PipelineError::config(format!(
                "stage '{}' ({}): {}",
                spec.name, spec.module, message
            ))
        })
    }

    /// Registered identifiers, sorted.
    pub fn modules(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for BlockRegistry {
    fn default() -> Self {
        Self::new()
    }
}
