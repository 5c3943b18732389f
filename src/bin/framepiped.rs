//! framepiped - local pipeline driver
//!
//! 1. Resolves run settings (optional run file, `FRAMEPIPE_*` env, flags)
//! 2. Builds the block pipeline from a TOML file
//! 3. Selects providers for the input and drains them batch by batch
//! 4. Writes the results document and, optionally, a replay capture

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use framepipe::config::{load_editable_config, RunConfig};
use framepipe::ingest::replay::ReplayRecorder;
use framepipe::ui::Ui;
use framepipe::{
    select_providers, BlockRegistry, ObjectStore, PipelineRunner, PredictorRegistry, Provider,
};

#[derive(Parser, Debug)]
#[command(name = "framepiped", version, about = "Run a frame pipeline over a video, images or a live stream")]
struct Args {
    /// Run settings file (TOML).
    #[arg(long, env = "FRAMEPIPE_RUN_CONFIG")]
    run_config: Option<PathBuf>,

    /// Pipeline file (TOML).
    #[arg(long, env = "FRAMEPIPE_CONFIG")]
    config: Option<PathBuf>,

    /// Free-form input: a path, directory, URL or device index.
    #[arg(long, env = "FRAMEPIPE_INPUT")]
    input: Option<String>,
    #[arg(long, env = "FRAMEPIPE_INPUT_VIDEO_PATH")]
    input_video_path: Option<String>,
    #[arg(long, env = "FRAMEPIPE_INPUT_IMAGES_DIR")]
    input_images_dir: Option<PathBuf>,
    #[arg(long, env = "FRAMEPIPE_INPUT_IMAGES_LIST")]
    input_images_list: Option<PathBuf>,
    #[arg(long, env = "FRAMEPIPE_INPUT_IMAGE_PATH")]
    input_image_path: Option<PathBuf>,
    #[arg(long, env = "FRAMEPIPE_INPUT_REPLAY_PATH")]
    input_replay_path: Option<PathBuf>,
    #[arg(long, env = "FRAMEPIPE_INPUT_STATE_PATH")]
    input_state_path: Option<PathBuf>,
    #[arg(long, env = "FRAMEPIPE_INPUT_RTSP_URL")]
    input_rtsp_url: Option<String>,
    #[arg(long, env = "FRAMEPIPE_INPUT_USB_CAM")]
    input_usb_cam: Option<String>,
    #[arg(long, env = "FRAMEPIPE_INPUT_VIDEOS_LIST")]
    input_videos_list: Option<PathBuf>,
    #[arg(long, env = "FRAMEPIPE_INPUT_VIDEOS_DIR")]
    input_videos_dir: Option<PathBuf>,
    #[arg(long, env = "FRAMEPIPE_INPUT_BATCH_SIZE")]
    input_batch_size: Option<usize>,
    #[arg(long, env = "FRAMEPIPE_INPUT_WIDTH")]
    input_width: Option<u32>,
    #[arg(long, env = "FRAMEPIPE_INPUT_HEIGHT")]
    input_height: Option<u32>,
    #[arg(long, env = "FRAMEPIPE_INPUT_SIZE_SCALE")]
    input_size_scale: Option<f32>,
    #[arg(long, env = "FRAMEPIPE_INPUT_FPS")]
    input_fps: Option<f64>,

    /// JSON file attached to every record as its editable config.
    #[arg(long, env = "FRAMEPIPE_EDITABLE_CONFIG")]
    editable_config: Option<PathBuf>,

    #[arg(long, env = "FRAMEPIPE_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,
    #[arg(long, env = "FRAMEPIPE_OUTPUT_PATH")]
    output_path: Option<PathBuf>,
    #[arg(long, env = "FRAMEPIPE_SAVE_JSON")]
    save_json: bool,
    /// Records file for a later replay.
    #[arg(long, env = "FRAMEPIPE_SAVE_REPLAY")]
    save_replay: Option<PathBuf>,
    #[arg(long, env = "FRAMEPIPE_DUMP_RAW_DATA")]
    dump_raw_data: bool,
    #[arg(long, env = "FRAMEPIPE_DUMP_STORE_STATE")]
    dump_store_state: bool,
    #[arg(long, env = "FRAMEPIPE_DUMP_STAGE_STATE")]
    dump_stage_state: bool,
    #[arg(long, env = "FRAMEPIPE_MAX_OBJECTS")]
    max_objects: Option<usize>,

    /// plain | pretty
    #[arg(long, env = "FRAMEPIPE_UI")]
    ui: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let ui = Ui::from_flag(args.ui.as_deref(), std::io::stderr().is_terminal());
    let cfg = resolve_config(&args)?;

    let cancelled = Arc::new(AtomicBool::new(false));
    {
        let cancelled = Arc::clone(&cancelled);
        ctrlc::set_handler(move || {
            cancelled.store(true, Ordering::SeqCst);
        })
        .context("failed to install Ctrl-C handler")?;
    }

    let mut runner = {
        let _stage = ui.stage("Building pipeline");
        let pipeline = cfg
            .pipeline
            .as_deref()
            .ok_or_else(|| anyhow!("a pipeline file is required (--config)"))?;
        let predictors = Arc::new(PredictorRegistry::builtin());
        let blocks = BlockRegistry::builtin(predictors);
        let store = ObjectStore::with_capacity(cfg.max_objects)?;
        PipelineRunner::from_file(pipeline, &blocks, store)
            .with_context(|| format!("failed to build pipeline from {}", pipeline.display()))?
    };
    log::info!("pipeline stages: {}", runner.stage_names().join(" -> "));

    let providers = {
        let _stage = ui.stage("Opening input");
        select_providers(&cfg.source)?
    };

    let count = providers.len();
    for (index, mut provider) in providers.into_iter().enumerate() {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        let mut recorder = cfg.output.save_replay.as_ref().map(|_| ReplayRecorder::new());
        let drained = drain(
            provider.as_mut(),
            &mut runner,
            recorder.as_mut(),
            &ui,
            &cancelled,
        );
        provider.release();
        drained?;

        if cfg.output.save_json {
            let path = cfg.output.results_path(index, count);
            provider
                .output_data()
                .write_json(&path, cfg.output.export)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        if let (Some(path), Some(recorder)) = (&cfg.output.save_replay, &recorder) {
            let path = numbered(path, index, count);
            recorder
                .write(&path)
                .with_context(|| format!("failed to write replay {}", path.display()))?;
        }
    }

    if cancelled.load(Ordering::SeqCst) {
        log::warn!("interrupted; partial results were written");
    }
    Ok(())
}

/// Run every batch of one provider through the pipeline.
fn drain(
    provider: &mut dyn Provider,
    runner: &mut PipelineRunner,
    mut recorder: Option<&mut ReplayRecorder>,
    ui: &Ui,
    cancelled: &AtomicBool,
) -> Result<()> {
    let info = provider.output_data().info().clone();
    let label = info.file_name.unwrap_or(info.kind);
    let total = provider.total_frames().map(|frames| frames as u64);
    let mut progress = ui.frames(&label, total);

    while !cancelled.load(Ordering::SeqCst) {
        let Some(batch) = provider.next() else {
            break;
        };
        let batch = batch.with_context(|| format!("failed to read from {}", label))?;
        if batch.is_empty() {
            continue;
        }
        if let Some(state) = batch.state {
            runner.restore_state(state);
        }
        let store_before = recorder.is_some().then(|| runner.store().snapshot());
        let records = runner.call(batch.records)?;
        progress.advance(records.len());

        let stage_state = runner.stage_states();
        provider
            .output_data_mut()
            .record_batch(&records, runner.store(), stage_state)?;
        if let (Some(recorder), Some(store_before)) = (recorder.as_deref_mut(), &store_before) {
            recorder.push_batch(&records, store_before)?;
        }
    }
    log::info!("{}: {} frames processed", label, progress.frames());
    Ok(())
}

/// Flags and env override the run file.
fn resolve_config(args: &Args) -> Result<RunConfig> {
    let mut cfg = RunConfig::load_from(args.run_config.as_deref())?;

    if args.config.is_some() {
        cfg.pipeline = args.config.clone();
    }
    let source = &mut cfg.source;
    override_with(&mut source.input, &args.input);
    override_with(&mut source.video_path, &args.input_video_path);
    override_with(&mut source.images_dir, &args.input_images_dir);
    override_with(&mut source.images_list, &args.input_images_list);
    override_with(&mut source.image_path, &args.input_image_path);
    override_with(&mut source.replay_path, &args.input_replay_path);
    override_with(&mut source.state_path, &args.input_state_path);
    override_with(&mut source.rtsp_url, &args.input_rtsp_url);
    override_with(&mut source.usb_cam, &args.input_usb_cam);
    override_with(&mut source.videos_list, &args.input_videos_list);
    override_with(&mut source.videos_dir, &args.input_videos_dir);
    override_with(&mut source.width, &args.input_width);
    override_with(&mut source.height, &args.input_height);
    override_with(&mut source.size_scale, &args.input_size_scale);
    override_with(&mut source.fps, &args.input_fps);
    if let Some(batch_size) = args.input_batch_size {
        source.batch_size = batch_size;
    }
    if let Some(path) = &args.editable_config {
        source.editable_config = Some(load_editable_config(path)?);
    }
    if let Some(dir) = &args.output_dir {
        source.output_dir = Some(dir.to_string_lossy().into_owned());
        cfg.output.dir = Some(dir.clone());
    }

    override_with(&mut cfg.output.path, &args.output_path);
    override_with(&mut cfg.output.save_replay, &args.save_replay);
    cfg.output.save_json |= args.save_json;
    cfg.output.export.raw_data |= args.dump_raw_data;
    cfg.output.export.store_state |= args.dump_store_state;
    cfg.output.export.stage_state |= args.dump_stage_state;
    if let Some(max) = args.max_objects {
        cfg.max_objects = max;
    }

    cfg.validate()?;
    Ok(cfg)
}

fn override_with<T: Clone>(slot: &mut Option<T>, value: &Option<T>) {
    if value.is_some() {
        slot.clone_from(value);
    }
}

fn numbered(path: &Path, index: usize, count: usize) -> PathBuf {
    if count == 1 {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "replay".to_string());
    path.with_file_name(format!("{}_{}.json", stem, index))
}
