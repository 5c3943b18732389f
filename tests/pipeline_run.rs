use std::path::Path;
use std::sync::Arc;

use framepipe::ingest::replay::ReplayRecorder;
use framepipe::{
    select_providers, BlockRegistry, ExportOptions, ObjectStore, PipelineError, PipelineRunner,
    PredictorRegistry, Provider, SourceSpec,
};

const PIPELINE: &str = r#"
[classifier]
module = "classify"
type = "classifier"
data = { output = "extra.label" }

[captions]
module = "caption"
font_size = 0.5
position = [2, 2]

[tracker]
module = "track"
"#;

const UNBOUND: &str = r#"
[classifier]
module = "classify"

[tracker]
module = "track"
"#;

const TRACK_ONLY: &str = r#"
[tracker]
module = "track"
"#;

fn sub_object_ids(store: &ObjectStore) -> Vec<uuid::Uuid> {
    store
        .iter()
        .flat_map(|entry| entry.objects.iter().map(|obj| obj.id()))
        .collect()
}

fn runner(config: &str, max_objects: usize) -> PipelineRunner {
    let config: toml::Table = toml::from_str(config).expect("pipeline toml");
    let blocks = BlockRegistry::builtin(Arc::new(PredictorRegistry::builtin()));
    let store = ObjectStore::with_capacity(max_objects).expect("store");
    PipelineRunner::from_config(&config, &blocks, store).expect("pipeline")
}

fn drain(provider: &mut dyn Provider, runner: &mut PipelineRunner) -> Vec<usize> {
    let mut sizes = Vec::new();
    while let Some(batch) = provider.next() {
        let batch = batch.expect("batch");
        if let Some(state) = batch.state {
            runner.restore_state(state);
        }
        let records = runner.call(batch.records).expect("pipeline call");
        sizes.push(records.len());
        let stage_state = runner.stage_states();
        provider
            .output_data_mut()
            .record_batch(&records, runner.store(), stage_state)
            .expect("record batch");
    }
    sizes
}

fn write_png(path: &Path, shade: u8) {
    image::RgbImage::from_pixel(12, 10, image::Rgb([shade, shade, shade]))
        .save(path)
        .expect("write png");
}

#[test]
fn image_directory_run_exports_results() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("a.png"), 10);
    write_png(&dir.path().join("b.png"), 250);
    std::fs::create_dir(dir.path().join("nested")).unwrap();
    write_png(&dir.path().join("nested").join("c.png"), 128);

    let spec = SourceSpec {
        images_dir: Some(dir.path().to_path_buf()),
        rtsp_url: Some("rtsp://ignored".into()),
        batch_size: 2,
        ..SourceSpec::default()
    };
    let mut providers = select_providers(&spec).expect("providers");
    assert_eq!(providers.len(), 1);
    let mut provider = providers.remove(0);
    assert_eq!(provider.output_data().info().kind, "images");

    let mut runner = runner(PIPELINE, 10);
    assert_eq!(runner.stage_names(), vec!["classifier", "captions", "tracker"]);
    assert_eq!(drain(provider.as_mut(), &mut runner), vec![2, 1]);

    let out = dir.path().join("out").join("results.json");
    provider
        .output_data()
        .write_json(
            &out,
            ExportOptions {
                stage_state: true,
                ..ExportOptions::default()
            },
        )
        .expect("write results");
    let doc: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&out).unwrap()).expect("results json");

    let data = doc["data"].as_array().unwrap();
    assert_eq!(data.len(), 3);
    let labels: Vec<&str> = data
        .iter()
        .map(|frame| frame["extra"]["label"].as_str().unwrap())
        .collect();
    assert_eq!(labels, vec!["dark", "bright", "dim"]);
    assert!(doc["raw_data"].as_array().unwrap().is_empty());
    assert_eq!(doc["stage_state"][1]["tracker"]["frames_seen"], 3);
    assert_eq!(runner.store().len(), 1);
}

#[test]
fn unknown_stage_module_names_the_stage() {
    let config: toml::Table =
        toml::from_str("[detector]\nmodule = \"yolo\"").expect("pipeline toml");
    let blocks = BlockRegistry::builtin(Arc::new(PredictorRegistry::builtin()));
    let err = PipelineRunner::from_config(&config, &blocks, ObjectStore::new())
        .err()
        .expect("unknown module");
    assert!(matches!(err, PipelineError::Configuration { .. }));
    assert!(err.to_string().contains("detector"));
}

#[test]
fn bound_output_without_rewrite_fails_the_batch() {
    let config = r#"
        [first]
        module = "classify"
        data = { output = "extra.label" }
        [second]
        module = "classify"
        data = { output = "extra.label" }
    "#;
    let spec = SourceSpec {
        video_path: Some("stub://clip?frames=2&width=8&height=8".into()),
        ..SourceSpec::default()
    };
    let mut provider = select_providers(&spec).unwrap().remove(0);
    let mut runner = runner(config, 10);
    let batch = provider.next().unwrap().unwrap();
    let err = runner.call(batch.records).unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateOutput { .. }));
}

#[test]
fn recorded_run_replays_with_store_state() {
    let dir = tempfile::tempdir().unwrap();
    let video = "stub://clip?frames=4&width=16&height=12";
    let spec = SourceSpec {
        video_path: Some(video.into()),
        ..SourceSpec::default()
    };
    let mut provider = select_providers(&spec).unwrap().remove(0);
    let mut runner = runner(UNBOUND, 10);
    let mut recorder = ReplayRecorder::new();
    while let Some(batch) = provider.next() {
        let before = runner.store().snapshot();
        let records = runner.call(batch.unwrap().records).unwrap();
        recorder.push_batch(&records, &before).unwrap();
    }
    assert_eq!(runner.store().total(), 4);
    assert_eq!(recorder.len(), 4);
    let records_path = dir.path().join("capture.json");
    let state_path = recorder.write(&records_path).unwrap();

    let spec = SourceSpec {
        replay_path: Some(records_path),
        state_path: Some(state_path.clone()),
        video_path: Some(video.into()),
        ..SourceSpec::default()
    };
    let mut provider = select_providers(&spec).unwrap().remove(0);
    assert_eq!(provider.output_data().info().kind, "replay");
    let mut fresh = crate::runner(UNBOUND, 10);
    assert_eq!(drain(provider.as_mut(), &mut fresh), vec![1, 1, 1, 1]);

    // Each replayed record already carries its recorded classification.
    let data = provider.output_data().data();
    assert_eq!(data.len(), 4);
    assert!(data
        .iter()
        .all(|frame| frame["objects"].as_array().unwrap().len() == 2));

    // Replaying the recorded objects through tracking alone rebuilds the
    // recorded store exactly.
    let spec = SourceSpec {
        replay_path: Some(dir.path().join("capture.json")),
        state_path: Some(state_path.clone()),
        video_path: Some(video.into()),
        ..SourceSpec::default()
    };
    let mut provider = select_providers(&spec).unwrap().remove(0);
    let mut tracked = crate::runner(TRACK_ONLY, 10);
    assert_eq!(drain(provider.as_mut(), &mut tracked), vec![1, 1, 1, 1]);
    assert_eq!(tracked.store().total(), runner.store().total());
    assert_eq!(sub_object_ids(tracked.store()), sub_object_ids(runner.store()));

    let spec = SourceSpec {
        replay_path: Some(dir.path().join("capture.json")),
        state_path: Some(state_path),
        video_path: Some(video.into()),
        batch_size: 2,
        ..SourceSpec::default()
    };
    assert!(select_providers(&spec).is_err());
}
