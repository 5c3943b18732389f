use serde_json::{json, Value};

use crate::error::{PipelineError, Result};
use crate::frame::FrameRecord;
use crate::store::{ObjectStore, TrackedObject};

use super::{Block, BlockSettings, StageSpec};

/// Keeps one tracked object per camera in the object store and appends
/// copies of every record's sub-objects to it.
pub struct TrackBlock {
    settings: BlockSettings,
    max_age_secs: Option<f64>,
    frames_seen: u64,
    objects_tracked: u64,
}

impl TrackBlock {
    pub fn new(settings: BlockSettings, max_age_secs: Option<f64>) -> Self {
        Self {
            settings,
            max_age_secs,
            frames_seen: 0,
            objects_tracked: 0,
        }
    }

    pub fn from_spec(spec: &StageSpec) -> Result<Self> {
        let max_age_secs = spec.param::<f64>("max_age_secs")?;
        if let Some(age) = max_age_secs {
            if !(age.is_finite() && age > 0.0) {
                return Err(PipelineError::config("max_age_secs must be positive"));
            }
        }
        Ok(Self::new(spec.settings(), max_age_secs))
    }
}

impl Block for TrackBlock {
    fn name(&self) -> &'static str {
        "track"
    }

    fn settings(&self) -> &BlockSettings {
        &self.settings
    }

    fn process(
        &mut self,
        batch: Vec<FrameRecord>,
        store: &mut ObjectStore,
    ) -> Result<Vec<FrameRecord>> {
        for record in &batch {
            self.frames_seen += 1;
            let camera_id = record.camera_id().unwrap_or("0");
            if store.find_by_camera_mut(camera_id).is_none() {
                store.admit(TrackedObject::new(Some(camera_id.to_string())));
            }
            let Some(entry) = store.find_by_camera_mut(camera_id) else {
                continue;
            };
            for obj in record.objects() {
                entry.objects.push(obj.clone());
                self.objects_tracked += 1;
            }
            entry.touch();
        }
        if let Some(age) = self.max_age_secs {
            store.sweep(age);
        }
        Ok(batch)
    }

    fn state(&self) -> Option<Value> {
        Some(json!({
            "frames_seen": self.frames_seen,
            "objects_tracked": self.objects_tracked,
        }))
    }
}
