//! Processing stages.
//!
//! A block takes a batch of frame records and returns a batch of the same
//! length, in the same order. Blocks may mutate record fields and the object
//! store they are handed; nothing else.
//!
//! Every block is built from a `StageSpec`: the enable flag, an optional
//! input/output field binding and block-specific parameters.

mod caption;
mod classify;
pub mod registry;
mod track;

pub use caption::{Annotator, CaptionBlock, CaptionStyle, MarkerAnnotator};
pub use classify::ClassifyBlock;
pub use registry::BlockRegistry;
pub use track::TrackBlock;

use serde::Deserialize;
use serde_json::Value;

use crate::error::{PipelineError, Result};
use crate::frame::{Field, FieldRef, FieldValue, FrameRecord};
use crate::store::ObjectStore;

/// Field binding declared in a stage's `data` table.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct BlockBinding {
    pub input: Option<Field>,
    pub output: Option<Field>,
    pub rewrite: Option<bool>,
}

/// Declarative description of one pipeline stage.
#[derive(Clone, Debug)]
pub struct StageSpec {
    pub name: String,
    pub module: String,
    /// Informational class tag.
    pub kind: Option<String>,
    pub turn_on: bool,
    pub binding: BlockBinding,
    /// Remaining block-specific keys.
    pub params: toml::Table,
}

impl StageSpec {
    /// Parse a stage table. `module` is required; `type`, `turn_on` and `data`
    /// are optional; everything else is kept as block parameters.
    pub fn from_table(name: &str, table: &toml::Table) -> Result<Self> {
        let mut params = table.clone();
        let module = match params.remove("module") {
            Some(toml::Value::String(module)) => module,
            Some(_) => return Err(stage_error(name, "'module' must be a string")),
            None => return Err(stage_error(name, "missing 'module'")),
        };
        let kind = match params.remove("type") {
            Some(toml::Value::String(kind)) => Some(kind),
            Some(_) => return Err(stage_error(name, "'type' must be a string")),
            None => None,
        };
        let turn_on = match params.remove("turn_on") {
            Some(toml::Value::Boolean(flag)) => flag,
            Some(_) => return Err(stage_error(name, "'turn_on' must be a boolean")),
            None => true,
        };
        let binding = match params.remove("data") {
            Some(value) => value
                .try_into::<BlockBinding>()
                .map_err(|e| stage_error(name, &format!("invalid 'data' table: {}", e)))?,
            None => BlockBinding::default(),
        };
        Ok(Self {
            name: name.to_string(),
            module,
            kind,
            turn_on,
            binding,
            params,
        })
    }

    pub fn settings(&self) -> BlockSettings {
        BlockSettings {
            turn_on: self.turn_on,
            binding: self.binding.clone(),
        }
    }

    /// Typed block parameter, `None` when absent.
    pub fn param<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.params.get(key) {
            Some(value) => value
                .clone()
                .try_into()
                .map(Some)
                .map_err(|e| PipelineError::config(format!("parameter '{}': {}", key, e))),
            None => Ok(None),
        }
    }
}

fn stage_error(name: &str, message: &str) -> PipelineError {
    PipelineError::config(format!("stage '{}': {}", name, message))
}

/// Enable flag plus field binding shared by every block.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockSettings {
    pub turn_on: bool,
    pub binding: BlockBinding,
}

impl Default for BlockSettings {
    fn default() -> Self {
        Self {
            turn_on: true,
            binding: BlockBinding::default(),
        }
    }
}

impl BlockSettings {
    /// Bound input if it is set on the record, else the default field.
    pub fn get_input<'a>(&self, record: &'a FrameRecord, default: &Field) -> Option<FieldRef<'a>> {
        if let Some(field) = &self.binding.input {
            if let Some(value) = record.get(field) {
                return Some(value);
            }
        }
        record.get(default)
    }

    /// Write `value` to the bound output, or to `default` when unbound.
    ///
    /// Writing a bound output that already holds a value fails unless rewrite
    /// is allowed. The explicit `allow_rewrite` wins over the binding's
    /// `rewrite`; both unset means no rewrite.
    pub fn set_output(
        &self,
        value: FieldValue,
        record: &mut FrameRecord,
        allow_rewrite: Option<bool>,
        default: &Field,
    ) -> Result<()> {
        let rewrite = allow_rewrite.or(self.binding.rewrite).unwrap_or(false);
        match &self.binding.output {
            Some(field) => {
                if record.is_set(field) && !rewrite {
                    return Err(PipelineError::DuplicateOutput {
                        field: field.to_string(),
                    });
                }
                record.set(field, value)
            }
            None => record.set(default, value),
        }
    }
}

/// A processing stage.
pub trait Block: Send {
    /// Implementation identifier, as used in the `module` key.
    fn name(&self) -> &'static str;

    fn settings(&self) -> &BlockSettings;

    /// Process an enabled batch. Must return the same records, in order.
    fn process(&mut self, batch: Vec<FrameRecord>, store: &mut ObjectStore)
        -> Result<Vec<FrameRecord>>;

    fn enabled(&self) -> bool {
        self.settings().turn_on
    }

    /// Run the block. A disabled block returns its batch untouched.
    fn call(&mut self, batch: Vec<FrameRecord>, store: &mut ObjectStore) -> Result<Vec<FrameRecord>> {
        if !self.enabled() {
            return Ok(batch);
        }
        log::debug!("start block {}", self.name());
        let out = self.process(batch, store)?;
        log::debug!("finish block {}", self.name());
        Ok(out)
    }

    /// Snapshot of block-internal state, if the block keeps any.
    fn state(&self) -> Option<Value> {
        None
    }
}
