//! Output aggregation: run metadata plus per-frame results in one exportable document.

use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;

use crate::error::Result;
use crate::frame::FrameRecord;
use crate::store::ObjectStore;

/// Run-level metadata, fixed when the aggregator is created.
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct RunInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    #[serde(rename = "type")]
    pub kind: String,
    pub dir: Option<String>,
    pub file_name: Option<String>,
    pub camera_id: String,
}

impl RunInfo {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            camera_id: "0".to_string(),
            ..Self::default()
        }
    }
}

/// Which of the large optional lists to include on export.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExportOptions {
    pub raw_data: bool,
    pub store_state: bool,
    pub stage_state: bool,
}

#[derive(Clone, Debug)]
pub struct OutputData {
    info: RunInfo,
    data: Vec<Value>,
    raw_data: Vec<Value>,
    store_state: Vec<Value>,
    stage_state: Vec<Value>,
}

impl OutputData {
    pub fn new(info: RunInfo) -> Self {
        Self {
            info,
            data: Vec::new(),
            raw_data: Vec::new(),
            store_state: Vec::new(),
            stage_state: Vec::new(),
        }
    }

    pub fn info(&self) -> &RunInfo {
        &self.info
    }

    pub fn info_mut(&mut self) -> &mut RunInfo {
        &mut self.info
    }

    pub fn data(&self) -> &[Value] {
        &self.data
    }

    pub fn raw_data(&self) -> &[Value] {
        &self.raw_data
    }

    pub fn extend_data(&mut self, value: Value) {
        self.data.push(value);
    }

    pub fn extend_raw_data(&mut self, value: Value) {
        self.raw_data.push(value);
    }

    pub fn extend_store_state(&mut self, value: Value) {
        self.store_state.push(value);
    }

    pub fn extend_stage_state(&mut self, value: Value) {
        self.stage_state.push(value);
    }

    /// Record one processed batch: a result summary per record, the
    /// serialized record as raw payload, and the current state snapshots.
    pub fn record_batch(
        &mut self,
        records: &[FrameRecord],
        store: &ObjectStore,
        stage_state: Value,
    ) -> Result<()> {
        for record in records {
            self.extend_data(frame_result(record));
            self.extend_raw_data(serde_json::to_value(record)?);
        }
        self.extend_store_state(serde_json::to_value(store)?);
        self.extend_stage_state(stage_state);
        Ok(())
    }

    pub fn to_json(&self, options: ExportOptions) -> Value {
        let gated = |enabled: bool, list: &Vec<Value>| {
            if enabled {
                Value::Array(list.clone())
            } else {
                Value::Array(Vec::new())
            }
        };
        json!({
            "info": self.info,
            "data": self.data,
            "raw_data": gated(options.raw_data, &self.raw_data),
            "store_state": gated(options.store_state, &self.store_state),
            "stage_state": gated(options.stage_state, &self.stage_state),
        })
    }

    pub fn write_json(&self, path: &Path, options: ExportOptions) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let body = serde_json::to_vec_pretty(&self.to_json(options))?;
        std::fs::write(path, body)?;
        log::info!("wrote results to {}", path.display());
        Ok(())
    }
}

/// Structured result for one frame: identity plus attached objects.
pub fn frame_result(record: &FrameRecord) -> Value {
    json!({
        "file_name": record.file_name,
        "frame_index": record.frame_index,
        "camera_id": record.camera_id(),
        "width": record.width(),
        "height": record.height(),
        "timestamp": record.timestamp(),
        "objects": record.objects(),
        "extra": record.extra,
    })
}
