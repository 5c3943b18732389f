//! FFmpeg decoding for video files, network streams and capture devices.
//!
//! Frames are converted to packed RGB24 in memory.

use ffmpeg_next as ffmpeg;

use crate::error::{PipelineError, Result};
use crate::frame::Image;

fn ffmpeg_error(context: &str, err: ffmpeg::Error) -> PipelineError {
    PipelineError::capture(format!("{}: {}", context, err))
}

pub(crate) struct FfmpegVideo {
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: Option<usize>,
    fps: Option<f64>,
    eof: bool,
}

impl FfmpegVideo {
    pub(crate) fn open(source: &str) -> Result<Self> {
        ffmpeg::init().map_err(|e| ffmpeg_error("initialize ffmpeg", e))?;
        ffmpeg::device::register_all();
        let input = ffmpeg::format::input(&source)
            .map_err(|e| ffmpeg_error(&format!("open '{}'", source), e))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| PipelineError::capture(format!("'{}' has no video track", source)))?;
        let stream_index = stream.index();
        let frame_count = usize::try_from(stream.frames()).ok().filter(|n| *n > 0);
        let rate = stream.avg_frame_rate();
        let fps = (rate.denominator() != 0 && rate.numerator() > 0)
            .then(|| rate.numerator() as f64 / rate.denominator() as f64);
        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| ffmpeg_error("load decoder parameters", e))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| ffmpeg_error("open video decoder", e))?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| ffmpeg_error("create scaler", e))?;

        Ok(Self {
            input,
            stream_index,
            decoder,
            scaler,
            frame_count,
            fps,
            eof: false,
        })
    }

    pub(crate) fn width(&self) -> u32 {
        self.decoder.width()
    }

    pub(crate) fn height(&self) -> u32 {
        self.decoder.height()
    }

    pub(crate) fn fps(&self) -> Option<f64> {
        self.fps
    }

    pub(crate) fn frame_count(&self) -> Option<usize> {
        self.frame_count
    }

    /// Decode the next frame. `None` after the decoder is drained.
    pub(crate) fn next_frame(&mut self) -> Result<Option<Image>> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded).map(Some);
            }
            if self.eof {
                return Ok(None);
            }
            match self.next_packet() {
                Some(packet) => self
                    .decoder
                    .send_packet(&packet)
                    .map_err(|e| ffmpeg_error("send packet", e))?,
                None => {
                    self.decoder
                        .send_eof()
                        .map_err(|e| ffmpeg_error("flush decoder", e))?;
                    self.eof = true;
                }
            }
        }
    }

    fn next_packet(&mut self) -> Option<ffmpeg::Packet> {
        let index = self.stream_index;
        self.input
            .packets()
            .find(|(stream, _)| stream.index() == index)
            .map(|(_, packet)| packet)
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Image> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .map_err(|e| ffmpeg_error("scale frame to RGB", e))?;
        let (pixels, width, height) = frame_to_pixels(&rgb)?;
        Image::from_raw(width, height, pixels)
            .ok_or_else(|| PipelineError::capture("decoded frame has an unexpected size"))
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let packed = data
            .get(..row_bytes * height as usize)
            .ok_or_else(|| PipelineError::capture("frame buffer is too short"))?;
        return Ok((packed.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .ok_or_else(|| PipelineError::capture("frame row is out of bounds"))?,
        );
    }

    Ok((pixels, width, height))
}
