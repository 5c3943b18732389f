//! Providers turn datasets into batches of populated frame records.
//!
//! One provider per source kind. Every provider is an iterator of
//! `Result<Batch>` and owns the `OutputData` its run is aggregated into.
//! Finite providers end with `None`; errors end the iteration after being
//! yielded once.

use serde_json::Value;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::frame::{FrameRecord, Image};
use crate::ingest::replay::ReplayFrame;
use crate::ingest::{Dataset, ImageDataset, LiveDataset, LivePoll, ReplayDataset, VideoDataset};
use crate::output::{OutputData, RunInfo};
use crate::store::ObjectStore;

/// A batch of records, plus the store snapshot to restore before running it.
#[derive(Debug, Default)]
pub struct Batch {
    pub records: Vec<FrameRecord>,
    pub state: Option<ObjectStore>,
}

impl Batch {
    pub fn new(records: Vec<FrameRecord>) -> Self {
        Self {
            records,
            state: None,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Settings shared by every provider.
#[derive(Clone, Debug)]
pub struct ProviderOptions {
    pub batch_size: usize,
    pub editable_config: Option<Value>,
    pub output_dir: Option<String>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            editable_config: None,
            output_dir: None,
        }
    }
}

pub trait Provider: Iterator<Item = Result<Batch>> {
    fn output_data(&self) -> &OutputData;

    fn output_data_mut(&mut self) -> &mut OutputData;

    /// Frames this provider will yield, `None` when unbounded or unknown.
    fn total_frames(&self) -> Option<usize> {
        None
    }

    /// Stop any background capture. Finite providers have nothing to stop.
    fn release(&mut self) {}
}

/// Build a record from a frame: identity fields, config override and images.
pub fn create_record(
    image: Option<Image>,
    frame_index: Option<u64>,
    file_name: Option<String>,
    editable_config: Option<Value>,
    camera_id: &str,
) -> FrameRecord {
    let mut record = FrameRecord::new();
    record.file_name = file_name;
    record.frame_index = frame_index;
    record.set_camera_id(camera_id);
    record.camera_name = Some(camera_id.to_string());
    record.editable_config = editable_config;
    if let Some(image) = image {
        record.attach_image(image);
    }
    record
}

fn run_info(kind: &str, dataset: &dyn Dataset, file_name: String, dir: Option<String>) -> RunInfo {
    let mut info = RunInfo::new(kind);
    info.width = dataset.width();
    info.height = dataset.height();
    info.fps = dataset.fps();
    info.file_name = Some(file_name);
    info.dir = dir;
    info
}

/// Shared fuse: after an error or exhaustion the provider yields `None`.
fn fuse<T>(done: &mut bool, result: Result<Option<T>>) -> Option<Result<T>> {
    match result {
        Ok(Some(value)) => Some(Ok(value)),
        Ok(None) => {
            *done = true;
            None
        }
        Err(e) => {
            *done = true;
            Some(Err(e))
        }
    }
}

pub struct VideoProvider {
    dataset: VideoDataset,
    options: ProviderOptions,
    file_name: String,
    output: OutputData,
    next_index: u64,
    done: bool,
}

impl VideoProvider {
    /// `file_name` is the name recorded in results, usually relative to the
    /// input root.
    pub fn new(dataset: VideoDataset, file_name: String, options: ProviderOptions) -> Self {
        let output = OutputData::new(run_info(
            "video",
            &dataset,
            file_name.clone(),
            options.output_dir.clone(),
        ));
        Self {
            dataset,
            options,
            file_name,
            output,
            next_index: 0,
            done: false,
        }
    }

    fn next_batch(&mut self) -> Result<Option<Batch>> {
        let mut records = Vec::with_capacity(self.options.batch_size);
        while records.len() < self.options.batch_size {
            let Some(frame) = self.dataset.read()? else {
                break;
            };
            records.push(create_record(
                Some(frame.image),
                Some(self.next_index),
                Some(self.file_name.clone()),
                self.options.editable_config.clone(),
                "0",
            ));
            self.next_index += 1;
        }
        Ok((!records.is_empty()).then(|| Batch::new(records)))
    }
}

impl Iterator for VideoProvider {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let batch = self.next_batch();
        fuse(&mut self.done, batch)
    }
}

impl Provider for VideoProvider {
    fn output_data(&self) -> &OutputData {
        &self.output
    }

    fn output_data_mut(&mut self) -> &mut OutputData {
        &mut self.output
    }

    fn total_frames(&self) -> Option<usize> {
        self.dataset.len()
    }
}

pub struct ImageProvider {
    dataset: ImageDataset,
    options: ProviderOptions,
    output: OutputData,
    next_index: u64,
    done: bool,
}

impl ImageProvider {
    pub fn new(dataset: ImageDataset, options: ProviderOptions) -> Self {
        let root = dataset.root().to_string_lossy().into_owned();
        let output = OutputData::new(run_info("images", &dataset, root.clone(), Some(root)));
        Self {
            dataset,
            options,
            output,
            next_index: 0,
            done: false,
        }
    }

    fn next_batch(&mut self) -> Result<Option<Batch>> {
        let mut records = Vec::with_capacity(self.options.batch_size);
        while records.len() < self.options.batch_size {
            let Some(frame) = self.dataset.read()? else {
                break;
            };
            let file_name = frame
                .path
                .as_deref()
                .map(|path| self.dataset.file_name(path));
            records.push(create_record(
                Some(frame.image),
                Some(self.next_index),
                file_name,
                self.options.editable_config.clone(),
                "0",
            ));
            self.next_index += 1;
        }
        Ok((!records.is_empty()).then(|| Batch::new(records)))
    }
}

impl Iterator for ImageProvider {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let batch = self.next_batch();
        fuse(&mut self.done, batch)
    }
}

impl Provider for ImageProvider {
    fn output_data(&self) -> &OutputData {
        &self.output
    }

    fn output_data_mut(&mut self) -> &mut OutputData {
        &mut self.output
    }

    fn total_frames(&self) -> Option<usize> {
        self.dataset.len()
    }
}

/// Yields one record per new live frame. An empty tick sleeps one poll
/// interval and yields an empty batch, so callers can check for cancellation.
pub struct LiveProvider {
    dataset: LiveDataset,
    options: ProviderOptions,
    output: OutputData,
    next_index: u64,
}

impl LiveProvider {
    pub fn new(dataset: LiveDataset, options: ProviderOptions) -> Self {
        let mut info = RunInfo::new("rtsp");
        info.width = dataset.width();
        info.height = dataset.height();
        info.fps = dataset.fps();
        info.file_name = Some(dataset.address().to_string());
        info.dir = options.output_dir.clone();
        let output = OutputData::new(info);
        Self {
            dataset,
            options,
            output,
            next_index: 0,
        }
    }
}

impl Iterator for LiveProvider {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.dataset.poll() {
            LivePoll::Frame(image) => {
                let record = create_record(
                    Some(image),
                    Some(self.next_index),
                    Some(self.dataset.address().to_string()),
                    self.options.editable_config.clone(),
                    "0",
                );
                self.next_index += 1;
                Some(Ok(Batch::new(vec![record])))
            }
            LivePoll::Empty => {
                std::thread::sleep(self.dataset.poll_interval());
                Some(Ok(Batch::default()))
            }
            LivePoll::Closed => None,
        }
    }
}

impl Provider for LiveProvider {
    fn output_data(&self) -> &OutputData {
        &self.output
    }

    fn output_data_mut(&mut self) -> &mut OutputData {
        &mut self.output
    }

    fn release(&mut self) {
        self.dataset.join();
        let stats = self.dataset.stats();
        log::info!(
            "{}: {} frames captured, {} reconnects",
            stats.address,
            stats.frames_captured,
            stats.reconnects
        );
    }
}

/// Replays serialized records with their frames re-attached. When a state
/// stream is present each batch carries the snapshot to restore first.
pub struct ReplayProvider {
    dataset: ReplayDataset,
    options: ProviderOptions,
    output: OutputData,
    done: bool,
}

impl ReplayProvider {
    pub fn new(dataset: ReplayDataset, options: ProviderOptions) -> Result<Self> {
        if dataset.has_state() && options.batch_size != 1 {
            return Err(PipelineError::config(
                "replaying store state requires batch size 1",
            ));
        }
        let mut info = RunInfo::new("replay");
        info.width = dataset.width();
        info.height = dataset.height();
        info.fps = dataset.fps();
        info.file_name = Some(dataset.source().to_string_lossy().into_owned());
        info.dir = options.output_dir.clone();
        Ok(Self {
            dataset,
            options,
            output: OutputData::new(info),
            done: false,
        })
    }

    fn next_batch(&mut self) -> Result<Option<Batch>> {
        let mut batch = Batch::default();
        while batch.len() < self.options.batch_size {
            let Some(ReplayFrame { record, state }) = self.dataset.next_frame()? else {
                break;
            };
            batch.records.push(record);
            if state.is_some() {
                batch.state = state;
            }
        }
        Ok((!batch.is_empty()).then_some(batch))
    }
}

impl Iterator for ReplayProvider {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let batch = self.next_batch();
        fuse(&mut self.done, batch)
    }
}

impl Provider for ReplayProvider {
    fn output_data(&self) -> &OutputData {
        &self.output
    }

    fn output_data_mut(&mut self) -> &mut OutputData {
        &mut self.output
    }

    fn total_frames(&self) -> Option<usize> {
        Some(self.dataset.len())
    }
}

struct CameraStream {
    name: String,
    camera_id: String,
    dataset: VideoDataset,
    editable_config: Option<Value>,
    next_index: u64,
}

/// Reads several videos in lock-step: one frame from each live capture per
/// tick, one batch per tick. Exhausted captures drop out; the provider ends
/// when none remain.
pub struct MultiVideoProvider {
    streams: Vec<CameraStream>,
    total_frames: Option<usize>,
    output: OutputData,
    done: bool,
}

impl MultiVideoProvider {
    /// `captures` are (file name, dataset) pairs; the camera id is the file stem.
    pub fn new(captures: Vec<(String, VideoDataset)>, options: ProviderOptions) -> Self {
        let total_frames = captures
            .iter()
            .map(|(_, dataset)| dataset.len())
            .sum::<Option<usize>>();
        let streams = captures
            .into_iter()
            .map(|(name, dataset)| {
                let camera_id = Path::new(&name)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_else(|| name.clone());
                let editable_config = camera_config(options.editable_config.as_ref(), &name);
                CameraStream {
                    name,
                    camera_id,
                    dataset,
                    editable_config,
                    next_index: 0,
                }
            })
            .collect();
        let mut info = RunInfo::new("videos_list");
        info.dir = options.output_dir.clone();
        Self {
            streams,
            total_frames,
            output: OutputData::new(info),
            done: false,
        }
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    fn tick(&mut self) -> Result<Option<Batch>> {
        let mut records = Vec::with_capacity(self.streams.len());
        let mut exhausted = Vec::new();
        for (position, stream) in self.streams.iter_mut().enumerate() {
            match stream.dataset.read()? {
                Some(frame) => {
                    records.push(create_record(
                        Some(frame.image),
                        Some(stream.next_index),
                        Some(stream.name.clone()),
                        stream.editable_config.clone(),
                        &stream.camera_id,
                    ));
                    stream.next_index += 1;
                }
                None => exhausted.push(position),
            }
        }
        for position in exhausted.into_iter().rev() {
            let stream = self.streams.remove(position);
            log::info!("{} exhausted after {} frames", stream.name, stream.next_index);
        }
        Ok((!records.is_empty()).then(|| Batch::new(records)))
    }
}

/// Per-camera override: `cameras[name]` when present, else the whole config.
fn camera_config(config: Option<&Value>, name: &str) -> Option<Value> {
    let config = config?;
    match config.get("cameras").and_then(|cameras| cameras.get(name)) {
        Some(camera) => Some(camera.clone()),
        None => Some(config.clone()),
    }
}

impl Iterator for MultiVideoProvider {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let batch = self.tick();
        fuse(&mut self.done, batch)
    }
}

impl Provider for MultiVideoProvider {
    fn output_data(&self) -> &OutputData {
        &self.output
    }

    fn output_data_mut(&mut self) -> &mut OutputData {
        &mut self.output
    }

    fn total_frames(&self) -> Option<usize> {
        self.total_frames
    }
}
