use std::sync::{Arc, Mutex};

use crate::error::{PipelineError, Result};
use crate::frame::{Field, FieldValue, FrameRecord};
use crate::object::SubObject;
use crate::predict::{Prediction, Predictor};
use crate::store::ObjectStore;

use super::{Block, BlockSettings, StageSpec};

/// Smallest edge, in pixels, a classifier will look at.
const MIN_EDGE: u32 = 3;

/// Runs a predictor on each record's image and attaches one classification
/// sub-object per (score, label) pair.
pub struct ClassifyBlock {
    settings: BlockSettings,
    predictor: Arc<Mutex<dyn Predictor>>,
}

impl ClassifyBlock {
    pub fn new(settings: BlockSettings, predictor: Arc<Mutex<dyn Predictor>>) -> Self {
        Self {
            settings,
            predictor,
        }
    }

    pub fn from_spec(spec: &StageSpec, predictor: Arc<Mutex<dyn Predictor>>) -> Result<Self> {
        let block = Self::new(spec.settings(), predictor);
        if block.settings.turn_on {
            block.lock()?.warm_up()?;
        }
        Ok(block)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, dyn Predictor + 'static>> {
        self.predictor
            .lock()
            .map_err(|_| PipelineError::predictor("predictor lock poisoned"))
    }

    fn classify(&self, record: &FrameRecord) -> Result<Option<Prediction>> {
        let Some(image) = self
            .settings
            .get_input(record, &Field::Image)
            .and_then(|value| value.as_image())
        else {
            return Ok(None);
        };
        if image.width() < MIN_EDGE || image.height() < MIN_EDGE {
            log::debug!(
                "skipping {}x{} image below classifier minimum",
                image.width(),
                image.height()
            );
            return Ok(None);
        }
        self.lock()?.predict(image).map(Some)
    }
}

impl Block for ClassifyBlock {
    fn name(&self) -> &'static str {
        "classify"
    }

    fn settings(&self) -> &BlockSettings {
        &self.settings
    }

    fn process(
        &mut self,
        mut batch: Vec<FrameRecord>,
        _store: &mut ObjectStore,
    ) -> Result<Vec<FrameRecord>> {
        for record in &mut batch {
            let Some(prediction) = self.classify(record)? else {
                continue;
            };
            for (score, label) in prediction.pairs() {
                record.add_object(SubObject::classification(score, label)?);
            }
            if self.settings.binding.output.is_some() {
                if let Some((_, label)) = prediction.top() {
                    self.settings.set_output(
                        FieldValue::Text(label.to_string()),
                        record,
                        None,
                        &Field::Extra("label".to_string()),
                    )?;
                }
            }
        }
        Ok(batch)
    }
}
