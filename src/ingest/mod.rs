//! Frame ingestion sources.
//!
//! File-backed inputs are `Dataset`s: finite sequences of raw frames with a
//! fixed pre-processing chain (`TransformChain`) applied before frames reach a
//! provider. Live streams are polled instead of read.
//!
//! - Video files (`stub://` synthetic source; FFmpeg behind `ingest-ffmpeg`)
//! - Image files and directories
//! - Live streams and capture devices, read on a background thread
//! - Replayed captures: serialized records plus their companion video
//!
//! `selector` turns a `SourceSpec` into the matching providers.

pub mod images;
pub mod live;
pub mod replay;
pub mod selector;
pub mod transform;
pub mod video;
#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod video_ffmpeg;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::frame::Image;

pub use images::ImageDataset;
pub use live::{LiveDataset, LivePoll, LiveStats, ReconnectPolicy};
pub use replay::ReplayDataset;
pub use selector::{select_providers, SourceSpec};
pub use transform::TransformChain;
pub use video::VideoDataset;

/// Registered image extensions, lowercase with leading dot.
pub const IMAGE_EXTENSIONS: [&str; 5] = [".jpg", ".png", ".tif", ".bmp", ".pnm"];

/// Registered video extensions, lowercase with leading dot.
pub const VIDEO_EXTENSIONS: [&str; 6] = [".mp4", ".avi", ".mkv", ".asf", ".webm", ".mts"];

/// Scheme used by the synthetic sources.
pub const STUB_SCHEME: &str = "stub://";

/// One decoded frame, after the transform chain.
#[derive(Clone, Debug)]
pub struct RawFrame {
    pub image: Image,
    /// Source file for image datasets.
    pub path: Option<PathBuf>,
}

/// A source of raw frames.
pub trait Dataset: Send {
    /// Number of frames, `None` when unknown.
    fn len(&self) -> Option<usize>;

    fn width(&self) -> Option<u32>;

    fn height(&self) -> Option<u32>;

    fn fps(&self) -> Option<f64>;

    /// Next frame, or `None` once the source is exhausted.
    fn read(&mut self) -> Result<Option<RawFrame>>;
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
}

pub fn has_image_extension(path: &Path) -> bool {
    extension_of(path).map_or(false, |ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

pub fn has_video_extension(path: &Path) -> bool {
    extension_of(path).map_or(false, |ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

pub fn is_stub(address: &str) -> bool {
    address.starts_with(STUB_SCHEME)
}

/// Query parameters of a `stub://name?key=value` address.
#[derive(Clone, Debug)]
pub(crate) struct StubParams {
    pub name: String,
    params: HashMap<String, String>,
}

impl StubParams {
    pub fn parse(address: &str) -> Result<Self> {
        let url = url::Url::parse(address)
            .map_err(|e| PipelineError::config(format!("invalid stub address '{}': {}", address, e)))?;
        if url.scheme() != "stub" {
            return Err(PipelineError::config(format!(
                "'{}' is not a stub address",
                address
            )));
        }
        let name = url.host_str().unwrap_or("stub").to_string();
        let params = url.query_pairs().into_owned().collect();
        Ok(Self { name, params })
    }

    pub fn get<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.params.get(key) {
            Some(raw) => raw.parse().map_err(|_| {
                PipelineError::config(format!(
                    "stub parameter '{}' has invalid value '{}'",
                    key, raw
                ))
            }),
            None => Ok(default),
        }
    }
}

/// Deterministic synthetic frame: a diagonal gradient shifted by `index`,
/// with the index encoded little-endian in the first pixel.
pub(crate) fn synthetic_frame(width: u32, height: u32, index: u64) -> Image {
    let mut frame = Image::from_fn(width, height, |x, y| {
        let v = ((x as u64 + y as u64 + index) % 256) as u8;
        image::Rgb([v, v, v])
    });
    if width > 0 && height > 0 {
        let bytes = index.to_le_bytes();
        frame.put_pixel(0, 0, image::Rgb([bytes[0], bytes[1], bytes[2]]));
    }
    frame
}

/// Inverse of the first-pixel encoding in `synthetic_frame`.
pub fn synthetic_index(image: &Image) -> Option<u64> {
    if image.width() == 0 || image.height() == 0 {
        return None;
    }
    let p = image.get_pixel(0, 0);
    Some(p[0] as u64 | (p[1] as u64) << 8 | (p[2] as u64) << 16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_are_case_insensitive() {
        assert!(has_image_extension(Path::new("a/B.PNG")));
        assert!(has_video_extension(Path::new("clip.MTS")));
        assert!(!has_video_extension(Path::new("clip.webmx")));
        assert!(!has_image_extension(Path::new("noext")));
    }

    #[test]
    fn stub_params_parse() {
        let params = StubParams::parse("stub://front?frames=5&width=32").unwrap();
        assert_eq!(params.name, "front");
        assert_eq!(params.get("frames", 0u64).unwrap(), 5);
        assert_eq!(params.get("height", 24u32).unwrap(), 24);
        let bad = StubParams::parse("stub://front?frames=x").unwrap();
        assert!(bad.get("frames", 0u64).is_err());
    }

    #[test]
    fn synthetic_frames_carry_their_index() {
        let frame = synthetic_frame(8, 8, 300);
        assert_eq!(synthetic_index(&frame), Some(300));
    }
}
