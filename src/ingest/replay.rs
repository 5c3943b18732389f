//! Replayed captures.
//!
//! A capture is a JSON array of serialized frame records (images stripped)
//! plus the companion video they were produced from, and optionally a JSON
//! array of object store snapshots, one per frame.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{Dataset, TransformChain, VideoDataset};
use crate::error::{PipelineError, Result};
use crate::frame::FrameRecord;
use crate::store::ObjectStore;

/// One replayed frame: the record with its image re-attached, and the store
/// snapshot taken when it was captured.
pub struct ReplayFrame {
    pub record: FrameRecord,
    pub state: Option<ObjectStore>,
}

pub struct ReplayDataset {
    source: PathBuf,
    records: std::vec::IntoIter<FrameRecord>,
    states: Option<std::vec::IntoIter<ObjectStore>>,
    len: usize,
    video: VideoDataset,
}

impl ReplayDataset {
    pub fn open(
        records_path: &Path,
        video_source: &str,
        state_path: Option<&Path>,
        batch_size: usize,
        transforms: TransformChain,
    ) -> Result<Self> {
        let records: Vec<FrameRecord> = read_json_array(records_path)?;
        let video = VideoDataset::open(video_source, transforms)?;
        match video.len() {
            Some(frames) if frames != records.len() => {
                return Err(PipelineError::config(format!(
                    "replay {} has {} records but video {} has {} frames",
                    records_path.display(),
                    records.len(),
                    video_source,
                    frames
                )));
            }
            None => log::warn!(
                "frame count of {} is unknown; replay stops at the shorter stream",
                video_source
            ),
            _ => {}
        }

        let states = match state_path {
            Some(path) => {
                if batch_size != 1 {
                    return Err(PipelineError::config(format!(
                        "replaying store state requires batch size 1, got {}",
                        batch_size
                    )));
                }
                let states: Vec<ObjectStore> = read_json_array(path)?;
                if states.len() != records.len() {
                    return Err(PipelineError::config(format!(
                        "state file {} has {} snapshots for {} records",
                        path.display(),
                        states.len(),
                        records.len()
                    )));
                }
                Some(states.into_iter())
            }
            None => None,
        };

        log::info!(
            "replaying {} records from {}",
            records.len(),
            records_path.display()
        );
        Ok(Self {
            source: records_path.to_path_buf(),
            len: records.len(),
            records: records.into_iter(),
            states,
            video,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn has_state(&self) -> bool {
        self.states.is_some()
    }

    pub fn width(&self) -> Option<u32> {
        self.video.width()
    }

    pub fn height(&self) -> Option<u32> {
        self.video.height()
    }

    pub fn fps(&self) -> Option<f64> {
        self.video.fps()
    }

    /// Next record with its frame attached. Ends with the shorter stream.
    pub fn next_frame(&mut self) -> Result<Option<ReplayFrame>> {
        let Some(mut record) = self.records.next() else {
            return Ok(None);
        };
        let Some(frame) = self.video.read()? else {
            return Ok(None);
        };
        record.attach_image(frame.image);
        let state = self.states.as_mut().and_then(Iterator::next);
        Ok(Some(ReplayFrame { record, state }))
    }
}

fn read_json_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let raw = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::missing(path),
        _ => PipelineError::Io(e),
    })?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Collects records and store snapshots for a later replay.
#[derive(Debug, Default)]
pub struct ReplayRecorder {
    records: Vec<Value>,
    states: Vec<Value>,
}

impl ReplayRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record a processed batch with the store as it stood before the batch
    /// ran, which is what replay restores ahead of re-running it. One
    /// snapshot is kept per record; exact replays need batch size 1.
    pub fn push_batch(&mut self, records: &[FrameRecord], store_before: &ObjectStore) -> Result<()> {
        let snapshot = serde_json::to_value(store_before)?;
        for record in records {
            self.records.push(serde_json::to_value(record)?);
            self.states.push(snapshot.clone());
        }
        Ok(())
    }

    /// Write `<stem>.json` records and `<stem>.state.json` snapshots.
    pub fn write(&self, records_path: &Path) -> Result<PathBuf> {
        if let Some(parent) = records_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(records_path, serde_json::to_vec(&self.records)?)?;
        let state_path = state_path_for(records_path);
        std::fs::write(&state_path, serde_json::to_vec(&self.states)?)?;
        log::info!(
            "saved {} replay records to {}",
            self.records.len(),
            records_path.display()
        );
        Ok(state_path)
    }
}

/// Companion state file for a replay records file.
pub fn state_path_for(records_path: &Path) -> PathBuf {
    records_path.with_extension("state.json")
}
