//! Video file datasets.
//!
//! `stub://<name>?frames=N&width=W&height=H&fps=F` produces a deterministic
//! synthetic clip. Real files are decoded with FFmpeg when the
//! `ingest-ffmpeg` feature is enabled.

use std::path::Path;

#[cfg(feature = "ingest-ffmpeg")]
use super::video_ffmpeg::FfmpegVideo;
use super::{is_stub, synthetic_frame, Dataset, RawFrame, StubParams, TransformChain};
use crate::error::{PipelineError, Result};

const DEFAULT_STUB_FRAMES: u64 = 30;
const DEFAULT_STUB_WIDTH: u32 = 64;
const DEFAULT_STUB_HEIGHT: u32 = 48;
const DEFAULT_STUB_FPS: f64 = 25.0;

pub struct VideoDataset {
    source: String,
    backend: VideoBackend,
    transforms: TransformChain,
}

enum VideoBackend {
    Synthetic(SyntheticVideo),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(FfmpegVideo),
}

impl VideoDataset {
    pub fn open(source: &str, transforms: TransformChain) -> Result<Self> {
        let backend = if is_stub(source) {
            VideoBackend::Synthetic(SyntheticVideo::parse(source)?)
        } else {
            if !Path::new(source).exists() {
                return Err(PipelineError::missing(source));
            }
            open_file(source)?
        };
        log::info!("opened video {}", source);
        Ok(Self {
            source: source.to_string(),
            backend,
            transforms,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(feature = "ingest-ffmpeg")]
fn open_file(source: &str) -> Result<VideoBackend> {
    Ok(VideoBackend::Ffmpeg(FfmpegVideo::open(source)?))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn open_file(source: &str) -> Result<VideoBackend> {
    Err(PipelineError::config(format!(
        "decoding '{}' requires the ingest-ffmpeg feature",
        source
    )))
}

impl Dataset for VideoDataset {
    fn len(&self) -> Option<usize> {
        match &self.backend {
            VideoBackend::Synthetic(video) => Some(video.frames as usize),
            #[cfg(feature = "ingest-ffmpeg")]
            VideoBackend::Ffmpeg(video) => video.frame_count(),
        }
    }

    fn width(&self) -> Option<u32> {
        match &self.backend {
            VideoBackend::Synthetic(video) => Some(video.width),
            #[cfg(feature = "ingest-ffmpeg")]
            VideoBackend::Ffmpeg(video) => Some(video.width()),
        }
    }

    fn height(&self) -> Option<u32> {
        match &self.backend {
            VideoBackend::Synthetic(video) => Some(video.height),
            #[cfg(feature = "ingest-ffmpeg")]
            VideoBackend::Ffmpeg(video) => Some(video.height()),
        }
    }

    fn fps(&self) -> Option<f64> {
        match &self.backend {
            VideoBackend::Synthetic(video) => Some(video.fps),
            #[cfg(feature = "ingest-ffmpeg")]
            VideoBackend::Ffmpeg(video) => video.fps(),
        }
    }

    fn read(&mut self) -> Result<Option<RawFrame>> {
        let frame = match &mut self.backend {
            VideoBackend::Synthetic(video) => video.next_frame(),
            #[cfg(feature = "ingest-ffmpeg")]
            VideoBackend::Ffmpeg(video) => video.next_frame()?,
        };
        Ok(frame.map(|image| RawFrame {
            image: self.transforms.apply(image),
            path: None,
        }))
    }
}

struct SyntheticVideo {
    frames: u64,
    width: u32,
    height: u32,
    fps: f64,
    cursor: u64,
}

impl SyntheticVideo {
    fn parse(source: &str) -> Result<Self> {
        let params = StubParams::parse(source)?;
        Ok(Self {
            frames: params.get("frames", DEFAULT_STUB_FRAMES)?,
            width: params.get("width", DEFAULT_STUB_WIDTH)?,
            height: params.get("height", DEFAULT_STUB_HEIGHT)?,
            fps: params.get("fps", DEFAULT_STUB_FPS)?,
            cursor: 0,
        })
    }

    fn next_frame(&mut self) -> Option<crate::frame::Image> {
        if self.cursor >= self.frames {
            return None;
        }
        let frame = synthetic_frame(self.width, self.height, self.cursor);
        self.cursor += 1;
        Some(frame)
    }
}
