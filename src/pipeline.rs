//! Pipeline runner: builds the ordered block chain from configuration and
//! folds each batch through it.

use serde_json::{Map, Value};
use std::path::Path;

use crate::block::{Block, BlockRegistry, StageSpec};
use crate::error::{PipelineError, Result};
use crate::frame::FrameRecord;
use crate::store::ObjectStore;

pub struct PipelineRunner {
    stages: Vec<(String, Box<dyn Block>)>,
    store: ObjectStore,
}

impl PipelineRunner {
    /// Build stages in declaration order. Table entries are stages; scalar
    /// entries are top-level settings and are skipped.
    pub fn from_config(
        config: &toml::Table,
        registry: &BlockRegistry,
        store: ObjectStore,
    ) -> Result<Self> {
        let mut stages = Vec::new();
        for (name, value) in config {
            let toml::Value::Table(table) = value else {
                continue;
            };
            let spec = StageSpec::from_table(name, table)?;
            let block = registry.build(&spec)?;
            log::info!(
                "stage '{}' -> {} ({})",
                name,
                spec.module,
                if block.enabled() { "on" } else { "off" }
            );
            stages.push((name.clone(), block));
        }
        Ok(Self { stages, store })
    }

    /// Read a TOML pipeline file and build it.
    pub fn from_file(path: &Path, registry: &BlockRegistry, store: ObjectStore) -> Result<Self> {
        let config = load_pipeline_config(path)?;
        Self::from_config(&config, registry, store)
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// Replace the object store wholesale with a snapshot.
    pub fn restore_state(&mut self, snapshot: ObjectStore) {
        self.store.restore(snapshot);
    }

    /// Run one batch through every stage in order. The first failing stage
    /// aborts the batch.
    pub fn call(&mut self, batch: Vec<FrameRecord>) -> Result<Vec<FrameRecord>> {
        let expected = batch.len();
        let mut batch = batch;
        for (name, block) in &mut self.stages {
            batch = block.call(batch, &mut self.store).map_err(|e| {
                log::error!("stage '{}' failed: {}", name, e);
                e
            })?;
            if batch.len() != expected {
                log::error!("stage '{}' changed the batch size", name);
                return Err(PipelineError::BatchShape {
                    stage: name.clone(),
                    expected,
                    actual: batch.len(),
                });
            }
        }
        Ok(batch)
    }

    /// Per-stage state snapshots, keyed by stage name.
    pub fn stage_states(&self) -> Value {
        let mut states = Map::new();
        for (name, block) in &self.stages {
            if let Some(state) = block.state() {
                states.insert(name.clone(), state);
            }
        }
        Value::Object(states)
    }
}

/// Parse a pipeline file, keeping declaration order.
pub fn load_pipeline_config(path: &Path) -> Result<toml::Table> {
    let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::missing(path),
        _ => PipelineError::Io(e),
    })?;
    raw.parse::<toml::Table>().map_err(|e| {
        PipelineError::config(format!("invalid pipeline file {}: {}", path.display(), e))
    })
}
