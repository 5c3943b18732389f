//! Source selection: map a `SourceSpec` to providers.
//!
//! Precedence, first match wins: video file/glob, image list, single image,
//! replayed capture, image directory, live stream or device, video list,
//! video directory. A free-form `input` is classified into one of these
//! fields before the precedence check.

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::live::ReconnectPolicy;
use super::{
    has_image_extension, has_video_extension, is_stub, ImageDataset, LiveDataset, ReplayDataset,
    TransformChain, VideoDataset,
};
use crate::error::{PipelineError, Result};
use crate::provider::{
    ImageProvider, LiveProvider, MultiVideoProvider, Provider, ProviderOptions, ReplayProvider,
    VideoProvider,
};

/// Where frames come from and how they are pre-processed.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SourceSpec {
    /// Free-form input, classified by `classify_input`.
    pub input: Option<String>,
    pub video_path: Option<String>,
    pub images_dir: Option<PathBuf>,
    pub images_list: Option<PathBuf>,
    pub image_path: Option<PathBuf>,
    pub replay_path: Option<PathBuf>,
    pub state_path: Option<PathBuf>,
    pub rtsp_url: Option<String>,
    pub usb_cam: Option<String>,
    pub videos_list: Option<PathBuf>,
    pub videos_dir: Option<PathBuf>,
    pub batch_size: usize,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub size_scale: Option<f32>,
    /// Requested frame rate, reported when the source has none of its own.
    pub fps: Option<f64>,
    pub editable_config: Option<Value>,
    pub output_dir: Option<String>,
    #[serde(skip)]
    pub reconnect: ReconnectPolicy,
}

impl Default for SourceSpec {
    fn default() -> Self {
        Self {
            input: None,
            video_path: None,
            images_dir: None,
            images_list: None,
            image_path: None,
            replay_path: None,
            state_path: None,
            rtsp_url: None,
            usb_cam: None,
            videos_list: None,
            videos_dir: None,
            batch_size: 1,
            width: None,
            height: None,
            size_scale: None,
            fps: None,
            editable_config: None,
            output_dir: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Which provider a spec resolves to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Video,
    ImageList,
    Image,
    Replay,
    ImageDir,
    Live,
    VideoList,
    VideoDir,
}

impl SourceSpec {
    /// Move a free-form `input` into the field it names.
    pub fn classify_input(&mut self) {
        let Some(input) = self.input.clone() else {
            return;
        };
        let lower = input.to_lowercase();
        let path = Path::new(&input);
        if lower.starts_with("rtsp") || lower.starts_with("http") || is_stub(&lower) {
            self.rtsp_url = Some(input);
        } else if input.len() == 1 && input.chars().all(|c| c.is_ascii_digit()) {
            self.usb_cam = Some(input);
        } else if path.is_dir() {
            self.images_dir = Some(path.to_path_buf());
        } else if has_image_extension(path) {
            self.image_path = Some(path.to_path_buf());
        } else if has_video_extension(path) {
            self.video_path = Some(input);
        } else if lower.ends_with(".json") {
            self.replay_path = Some(path.to_path_buf());
        } else {
            log::warn!("could not classify input '{}'", input);
        }
    }

    /// Resolve the provider kind by fixed precedence.
    pub fn resolve_kind(&self) -> Result<SourceKind> {
        if self.batch_size == 0 {
            return Err(PipelineError::config("batch size must be at least 1"));
        }
        if self.video_path.is_some() && self.replay_path.is_none() {
            return Ok(SourceKind::Video);
        }
        if self.images_list.is_some() {
            return Ok(SourceKind::ImageList);
        }
        if self.image_path.is_some() {
            return Ok(SourceKind::Image);
        }
        if self.replay_path.is_some() {
            return Ok(SourceKind::Replay);
        }
        if self.images_dir.is_some() {
            return Ok(SourceKind::ImageDir);
        }
        if self.rtsp_url.is_some() || self.usb_cam.is_some() {
            return Ok(SourceKind::Live);
        }
        if self.videos_list.is_some() {
            return Ok(SourceKind::VideoList);
        }
        if self.videos_dir.is_some() {
            return Ok(SourceKind::VideoDir);
        }
        Err(PipelineError::config("no input source given"))
    }

    pub fn transforms(&self) -> Result<TransformChain> {
        TransformChain::new(self.width, self.height, self.size_scale)
    }

    pub fn provider_options(&self) -> ProviderOptions {
        ProviderOptions {
            batch_size: self.batch_size,
            editable_config: self.editable_config.clone(),
            output_dir: self.output_dir.clone(),
        }
    }
}

/// Instantiate the providers for `spec`.
pub fn select_providers(spec: &SourceSpec) -> Result<Vec<Box<dyn Provider>>> {
    let mut spec = spec.clone();
    spec.classify_input();
    let kind = spec.resolve_kind()?;
    log::info!("input resolved to {:?}", kind);
    let transforms = spec.transforms()?;
    let options = spec.provider_options();

    let mut providers: Vec<Box<dyn Provider>> = match kind {
        SourceKind::Video => {
            let pattern = required(&spec.video_path, "video path")?;
            video_providers(pattern, transforms, &options)?
        }
        SourceKind::ImageList => {
            let list = required(&spec.images_list, "image list")?;
            let root = spec.images_dir.as_ref().ok_or_else(|| {
                PipelineError::config(format!(
                    "image list {} needs an images root directory",
                    list.display()
                ))
            })?;
            let dataset = ImageDataset::from_list(list, root, transforms)?;
            vec![Box::new(ImageProvider::new(dataset, options))]
        }
        SourceKind::Image => {
            let path = required(&spec.image_path, "image path")?;
            let dataset = ImageDataset::single(path, transforms)?;
            vec![Box::new(ImageProvider::new(dataset, options))]
        }
        SourceKind::Replay => {
            let records = required(&spec.replay_path, "replay path")?;
            let video = spec.video_path.as_deref().ok_or_else(|| {
                PipelineError::config(format!(
                    "replay {} needs its companion video",
                    records.display()
                ))
            })?;
            let dataset = ReplayDataset::open(
                records,
                video,
                spec.state_path.as_deref(),
                spec.batch_size,
                transforms,
            )?;
            vec![Box::new(ReplayProvider::new(dataset, options)?)]
        }
        SourceKind::ImageDir => {
            let root = required(&spec.images_dir, "images directory")?;
            let dataset = ImageDataset::from_dir(root, transforms)?;
            vec![Box::new(ImageProvider::new(dataset, options))]
        }
        SourceKind::Live => {
            let address = match (&spec.rtsp_url, &spec.usb_cam) {
                (Some(url), _) => url.as_str(),
                (None, Some(device)) => device.as_str(),
                (None, None) => return Err(PipelineError::config("no live stream address")),
            };
            let dataset = LiveDataset::open(address, transforms, spec.reconnect)?;
            vec![Box::new(LiveProvider::new(dataset, options))]
        }
        SourceKind::VideoList => {
            let list = required(&spec.videos_list, "video list")?;
            let root = spec.videos_dir.as_ref().ok_or_else(|| {
                PipelineError::config(format!(
                    "video list {} needs a videos root directory",
                    list.display()
                ))
            })?;
            let names = read_list(list)?;
            let captures = open_captures(root, names, transforms)?;
            vec![Box::new(MultiVideoProvider::new(captures, options))]
        }
        SourceKind::VideoDir => {
            let root = required(&spec.videos_dir, "videos directory")?;
            if !root.is_dir() {
                return Err(PipelineError::missing(root));
            }
            let names: Vec<String> = find_files(&root.join("**").join("*"), has_video_extension)?
                .iter()
                .map(|path| relative_name(path, root))
                .collect();
            if names.is_empty() {
                return Err(PipelineError::missing(root));
            }
            let captures = open_captures(root, names, transforms)?;
            vec![Box::new(MultiVideoProvider::new(captures, options))]
        }
    };

    if let Some(fps) = spec.fps {
        for provider in &mut providers {
            let info = provider.output_data_mut().info_mut();
            if info.fps.is_none() {
                info.fps = Some(fps);
            }
        }
    }
    Ok(providers)
}

fn required<'a, T>(value: &'a Option<T>, what: &str) -> Result<&'a T> {
    value
        .as_ref()
        .ok_or_else(|| PipelineError::config(format!("{} is not set", what)))
}

/// One provider per matched video. Globs match registered video extensions.
fn video_providers(
    pattern: &str,
    transforms: TransformChain,
    options: &ProviderOptions,
) -> Result<Vec<Box<dyn Provider>>> {
    if !pattern.contains('*') {
        let dataset = VideoDataset::open(pattern, transforms)?;
        return Ok(vec![Box::new(VideoProvider::new(
            dataset,
            pattern.to_string(),
            options.clone(),
        ))]);
    }
    let base = glob_base(pattern);
    let matches = find_files(Path::new(pattern), has_video_extension)?;
    if matches.is_empty() {
        return Err(PipelineError::missing(pattern));
    }
    let mut providers: Vec<Box<dyn Provider>> = Vec::with_capacity(matches.len());
    for path in matches {
        let source = path.to_string_lossy().into_owned();
        let dataset = VideoDataset::open(&source, transforms)?;
        providers.push(Box::new(VideoProvider::new(
            dataset,
            relative_name(&path, &base),
            options.clone(),
        )));
    }
    Ok(providers)
}

/// Literal directory prefix of a glob pattern.
fn glob_base(pattern: &str) -> PathBuf {
    let literal = &pattern[..pattern.find('*').unwrap_or(pattern.len())];
    match literal.rfind(std::path::MAIN_SEPARATOR) {
        Some(end) => PathBuf::from(&literal[..end]),
        None => PathBuf::new(),
    }
}

fn find_files(pattern: &Path, keep: fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let pattern = pattern.to_str().ok_or_else(|| {
        PipelineError::config(format!("pattern {} is not valid UTF-8", pattern.display()))
    })?;
    let entries = glob::glob(pattern)
        .map_err(|e| PipelineError::config(format!("bad pattern '{}': {}", pattern, e)))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file() && keep(path))
        .collect();
    files.sort();
    Ok(files)
}

fn relative_name(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

fn read_list(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::missing(path),
        _ => PipelineError::Io(e),
    })?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

fn open_captures(
    root: &Path,
    names: Vec<String>,
    transforms: TransformChain,
) -> Result<Vec<(String, VideoDataset)>> {
    names
        .into_iter()
        .map(|name| {
            let source = if is_stub(&name) {
                name.clone()
            } else {
                root.join(&name).to_string_lossy().into_owned()
            };
            Ok((name, VideoDataset::open(&source, transforms)?))
        })
        .collect()
}
