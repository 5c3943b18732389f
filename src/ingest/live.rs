//! Live stream ingestion.
//!
//! A `LiveDataset` owns one background capture thread. The thread reads
//! frames as fast as the source delivers them and overwrites a single-slot
//! buffer, so the consumer always sees the most recent frame and older unread
//! frames are dropped. The slot and the alive flag sit under one mutex; the
//! lock is never held across a blocking read.
//!
//! On a read failure the capture handle is dropped and reopened: each round
//! makes up to `ReconnectPolicy::attempts` tries spaced by `delay`, and rounds
//! repeat until a reopen succeeds or the dataset is released.
//!
//! Backends: `stub://<name>?width=W&height=H&fps=F&fail_every=N&unreachable=B`
//! synthetic camera, and FFmpeg (RTSP URLs and `/dev/videoN` devices) behind
//! the `ingest-ffmpeg` feature.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use super::{is_stub, synthetic_frame, StubParams, TransformChain};
use crate::error::{PipelineError, Result};
use crate::frame::Image;

/// An open capture handle.
pub trait Capture: Send {
    /// Block until the next frame is available.
    fn read(&mut self) -> Result<Image>;

    fn width(&self) -> Option<u32> {
        None
    }

    fn height(&self) -> Option<u32> {
        None
    }

    fn fps(&self) -> Option<f64> {
        None
    }
}

/// Opens (and reopens) capture handles for one address.
pub trait CaptureOpener: Send + 'static {
    fn open(&mut self) -> Result<Box<dyn Capture>>;

    fn address(&self) -> &str;
}

/// Bounded retry per reconnect round.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            attempts: 10,
            delay: Duration::from_secs(1),
        }
    }
}

/// Result of one non-blocking poll.
#[derive(Debug)]
pub enum LivePoll {
    Frame(Image),
    /// Nothing new since the last poll.
    Empty,
    /// The stream was released.
    Closed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LiveStats {
    pub address: String,
    pub frames_captured: u64,
    pub reconnects: u64,
}

struct Slot {
    frame: Option<Image>,
    alive: bool,
}

/// Single-slot latest-frame buffer shared with the capture thread.
pub(crate) struct LatestFrame {
    slot: Mutex<Slot>,
    frames: AtomicU64,
    reconnects: AtomicU64,
}

impl LatestFrame {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                frame: None,
                alive: true,
            }),
            frames: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // Slot contents stay valid after a panic.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Overwrite the slot. Ignored after release.
    pub(crate) fn publish(&self, frame: Image) {
        let mut slot = self.lock();
        if slot.alive {
            slot.frame = Some(frame);
            self.frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn take(&self) -> LivePoll {
        let mut slot = self.lock();
        if !slot.alive {
            return LivePoll::Closed;
        }
        match slot.frame.take() {
            Some(frame) => LivePoll::Frame(frame),
            None => LivePoll::Empty,
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.lock().alive
    }

    pub(crate) fn release(&self) {
        let mut slot = self.lock();
        slot.alive = false;
        slot.frame = None;
    }
}

pub struct LiveDataset {
    address: String,
    shared: Arc<LatestFrame>,
    transforms: TransformChain,
    poll_interval: Duration,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<f64>,
    worker: Option<JoinHandle<()>>,
}

impl LiveDataset {
    /// Open a stream address or a device index.
    pub fn open(address: &str, transforms: TransformChain, policy: ReconnectPolicy) -> Result<Self> {
        Self::with_opener(opener_for(address)?, transforms, policy)
    }

    /// Run one bounded open round, then start the capture thread.
    pub fn with_opener(
        mut opener: Box<dyn CaptureOpener>,
        transforms: TransformChain,
        policy: ReconnectPolicy,
    ) -> Result<Self> {
        let address = opener.address().to_string();
        let capture = open_round(opener.as_mut(), &policy)
            .ok_or_else(|| PipelineError::missing(address.as_str()))?;
        let width = capture.width();
        let height = capture.height();
        let fps = capture.fps();
        let poll_interval = fps
            .filter(|fps| *fps > 0.0)
            .map(|fps| Duration::from_secs_f64(1.0 / fps))
            .unwrap_or(Duration::from_millis(200));

        let shared = Arc::new(LatestFrame::new());
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name(format!("capture:{}", address))
            .spawn(move || capture_loop(capture, opener, worker_shared, policy))?;
        log::info!("live stream {} started", address);

        Ok(Self {
            address,
            shared,
            transforms,
            poll_interval,
            width,
            height,
            fps,
            worker: Some(worker),
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn width(&self) -> Option<u32> {
        self.width
    }

    pub fn height(&self) -> Option<u32> {
        self.height
    }

    pub fn fps(&self) -> Option<f64> {
        self.fps
    }

    /// Suggested sleep between empty polls: one frame period of the source.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Take the latest frame, if a new one has arrived.
    pub fn poll(&self) -> LivePoll {
        match self.shared.take() {
            LivePoll::Frame(image) => LivePoll::Frame(self.transforms.apply(image)),
            other => other,
        }
    }

    pub fn stats(&self) -> LiveStats {
        LiveStats {
            address: self.address.clone(),
            frames_captured: self.shared.frames.load(Ordering::Relaxed),
            reconnects: self.shared.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Stop capturing. The thread exits after its current read.
    pub fn release(&self) {
        if self.shared.is_alive() {
            log::info!("releasing live stream {}", self.address);
        }
        self.shared.release();
    }

    /// Release and wait for the capture thread to finish.
    pub fn join(&mut self) {
        self.release();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("capture thread for {} panicked", self.address);
            }
        }
    }
}

impl Drop for LiveDataset {
    fn drop(&mut self) {
        self.release();
    }
}

/// Up to `attempts` opens with `delay` between them; no wait after the last.
fn open_round(opener: &mut dyn CaptureOpener, policy: &ReconnectPolicy) -> Option<Box<dyn Capture>> {
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        match opener.open() {
            Ok(capture) => return Some(capture),
            Err(e) => {
                log::warn!(
                    "open {} failed (attempt {}/{}): {}",
                    opener.address(),
                    attempt,
                    attempts,
                    e
                );
                if attempt < attempts {
                    std::thread::sleep(policy.delay);
                }
            }
        }
    }
    None
}

/// Reopen until success or release. `None` means the stream was released.
fn reopen(
    opener: &mut dyn CaptureOpener,
    policy: &ReconnectPolicy,
    shared: &LatestFrame,
) -> Option<Box<dyn Capture>> {
    while shared.is_alive() {
        if let Some(capture) = open_round(opener, policy) {
            shared.reconnects.fetch_add(1, Ordering::Relaxed);
            log::info!("reconnected to {}", opener.address());
            return Some(capture);
        }
        log::warn!("reconnect round for {} exhausted, retrying", opener.address());
        if shared.is_alive() {
            std::thread::sleep(policy.delay);
        }
    }
    None
}

fn capture_loop(
    mut capture: Box<dyn Capture>,
    mut opener: Box<dyn CaptureOpener>,
    shared: Arc<LatestFrame>,
    policy: ReconnectPolicy,
) {
    while shared.is_alive() {
        match capture.read() {
            Ok(frame) => shared.publish(frame),
            Err(e) => {
                log::warn!("read from {} failed: {}", opener.address(), e);
                drop(capture);
                match reopen(opener.as_mut(), &policy, &shared) {
                    Some(reopened) => capture = reopened,
                    None => break,
                }
            }
        }
    }
    log::info!("stream {} ended", opener.address());
}

/// Pick a backend for `address`. A single digit selects a local device.
fn opener_for(address: &str) -> Result<Box<dyn CaptureOpener>> {
    if is_stub(address) {
        return Ok(Box::new(StubCameraOpener::parse(address)?));
    }
    let address = device_path(address).unwrap_or_else(|| address.to_string());
    ffmpeg_opener(address)
}

fn device_path(address: &str) -> Option<String> {
    let mut chars = address.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_digit() => Some(format!("/dev/video{}", c)),
        _ => None,
    }
}

#[cfg(feature = "ingest-ffmpeg")]
fn ffmpeg_opener(address: String) -> Result<Box<dyn CaptureOpener>> {
    Ok(Box::new(ffmpeg_capture::FfmpegOpener { address }))
}

#[cfg(not(feature = "ingest-ffmpeg"))]
fn ffmpeg_opener(address: String) -> Result<Box<dyn CaptureOpener>> {
    Err(PipelineError::config(format!(
        "live stream '{}' requires the ingest-ffmpeg feature",
        address
    )))
}

#[cfg(feature = "ingest-ffmpeg")]
mod ffmpeg_capture {
    use super::{Capture, CaptureOpener};
    use crate::error::{PipelineError, Result};
    use crate::frame::Image;
    use crate::ingest::video_ffmpeg::FfmpegVideo;

    pub(super) struct FfmpegOpener {
        pub(super) address: String,
    }

    impl CaptureOpener for FfmpegOpener {
        fn open(&mut self) -> Result<Box<dyn Capture>> {
            Ok(Box::new(FfmpegCapture(FfmpegVideo::open(&self.address)?)))
        }

        fn address(&self) -> &str {
            &self.address
        }
    }

    struct FfmpegCapture(FfmpegVideo);

    impl Capture for FfmpegCapture {
        fn read(&mut self) -> Result<Image> {
            self.0
                .next_frame()?
                .ok_or_else(|| PipelineError::capture("stream ended"))
        }

        fn width(&self) -> Option<u32> {
            Some(self.0.width())
        }

        fn height(&self) -> Option<u32> {
            Some(self.0.height())
        }

        fn fps(&self) -> Option<f64> {
            self.0.fps()
        }
    }
}

/// Synthetic camera for `stub://` addresses.
struct StubCameraOpener {
    address: String,
    width: u32,
    height: u32,
    fps: f64,
    fail_every: u64,
    unreachable: bool,
    next_index: Arc<AtomicU64>,
}

impl StubCameraOpener {
    fn parse(address: &str) -> Result<Self> {
        let params = StubParams::parse(address)?;
        Ok(Self {
            address: address.to_string(),
            width: params.get("width", 64)?,
            height: params.get("height", 48)?,
            fps: params.get("fps", 25.0)?,
            fail_every: params.get("fail_every", 0)?,
            unreachable: params.get("unreachable", false)?,
            next_index: Arc::new(AtomicU64::new(0)),
        })
    }
}

impl CaptureOpener for StubCameraOpener {
    fn open(&mut self) -> Result<Box<dyn Capture>> {
        if self.unreachable {
            return Err(PipelineError::capture(format!("{} is unreachable", self.address)));
        }
        Ok(Box::new(StubCamera {
            width: self.width,
            height: self.height,
            fps: self.fps,
            fail_every: self.fail_every,
            reads: 0,
            next_index: Arc::clone(&self.next_index),
        }))
    }

    fn address(&self) -> &str {
        &self.address
    }
}

struct StubCamera {
    width: u32,
    height: u32,
    fps: f64,
    fail_every: u64,
    reads: u64,
    /// Shared across reopens so frame indices keep increasing.
    next_index: Arc<AtomicU64>,
}

impl Capture for StubCamera {
    fn read(&mut self) -> Result<Image> {
        if self.fps > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(1.0 / self.fps));
        }
        self.reads += 1;
        if self.fail_every > 0 && self.reads % self.fail_every == 0 {
            return Err(PipelineError::capture("synthetic read failure"));
        }
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        Ok(synthetic_frame(self.width, self.height, index))
    }

    fn width(&self) -> Option<u32> {
        Some(self.width)
    }

    fn height(&self) -> Option<u32> {
        Some(self.height)
    }

    fn fps(&self) -> Option<f64> {
        Some(self.fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::synthetic_index;
    use std::time::Instant;

    fn fast_policy() -> ReconnectPolicy {
        ReconnectPolicy {
            attempts: 2,
            delay: Duration::from_millis(1),
        }
    }

    fn wait_for_frame(dataset: &LiveDataset) -> Image {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let LivePoll::Frame(image) = dataset.poll() {
                return image;
            }
            assert!(Instant::now() < deadline, "no frame within deadline");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn slot_keeps_only_latest_frame() {
        let slot = LatestFrame::new();
        for index in 1..=3 {
            slot.publish(synthetic_frame(4, 4, index));
        }
        match slot.take() {
            LivePoll::Frame(image) => assert_eq!(synthetic_index(&image), Some(3)),
            other => panic!("expected a frame, got {:?}", other),
        }
        assert!(matches!(slot.take(), LivePoll::Empty));

        slot.publish(synthetic_frame(4, 4, 4));
        slot.release();
        assert!(matches!(slot.take(), LivePoll::Closed));
        slot.publish(synthetic_frame(4, 4, 5));
        assert!(matches!(slot.take(), LivePoll::Closed));
    }

    #[test]
    fn consumer_sees_newest_frames_only() {
        let mut dataset = LiveDataset::open(
            "stub://cam?width=8&height=8&fps=1000",
            TransformChain::default(),
            fast_policy(),
        )
        .unwrap();
        let first = synthetic_index(&wait_for_frame(&dataset)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let second = synthetic_index(&wait_for_frame(&dataset)).unwrap();
        assert!(second > first + 1, "expected dropped frames between {} and {}", first, second);
        assert!(dataset.stats().frames_captured > second - first);
        dataset.join();
        assert!(matches!(dataset.poll(), LivePoll::Closed));
    }

    #[test]
    fn read_failures_trigger_reconnect() {
        let mut dataset = LiveDataset::open(
            "stub://cam?width=4&height=4&fps=1000&fail_every=3",
            TransformChain::default(),
            fast_policy(),
        )
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while dataset.stats().reconnects < 2 {
            assert!(Instant::now() < deadline, "no reconnects observed");
            std::thread::sleep(Duration::from_millis(5));
        }
        wait_for_frame(&dataset);
        dataset.join();
    }

    #[test]
    fn unreachable_stream_fails_at_construction() {
        let err = LiveDataset::open(
            "stub://cam?unreachable=true",
            TransformChain::default(),
            fast_policy(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, PipelineError::MissingSource { .. }));
    }

    #[test]
    fn failed_round_does_not_wait_after_last_attempt() {
        let policy = ReconnectPolicy {
            attempts: 2,
            delay: Duration::from_millis(300),
        };
        let started = Instant::now();
        let err = LiveDataset::open("stub://cam?unreachable=true", TransformChain::default(), policy)
            .err()
            .unwrap();
        let elapsed = started.elapsed();
        assert!(matches!(err, PipelineError::MissingSource { .. }));
        assert!(elapsed >= Duration::from_millis(300), "took {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(550), "took {:?}", elapsed);
    }

    #[test]
    fn transforms_apply_on_poll() {
        let chain = TransformChain::new(Some(2), Some(2), None).unwrap();
        let mut dataset =
            LiveDataset::open("stub://cam?width=8&height=8&fps=500", chain, fast_policy()).unwrap();
        assert_eq!(wait_for_frame(&dataset).dimensions(), (2, 2));
        assert_eq!(dataset.width(), Some(8));
        dataset.join();
    }

    #[test]
    fn device_index_maps_to_video_device() {
        assert_eq!(device_path("0").as_deref(), Some("/dev/video0"));
        assert_eq!(device_path("12"), None);
        assert_eq!(device_path("rtsp://x"), None);
    }
}
