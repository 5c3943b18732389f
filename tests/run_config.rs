use std::sync::Mutex;

use tempfile::NamedTempFile;

use framepipe::config::RunConfig;
use framepipe::PipelineError;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FRAMEPIPE_RUN_CONFIG",
        "FRAMEPIPE_CONFIG",
        "FRAMEPIPE_INPUT",
        "FRAMEPIPE_INPUT_BATCH_SIZE",
        "FRAMEPIPE_MAX_OBJECTS",
        "FRAMEPIPE_OUTPUT_DIR",
        "FRAMEPIPE_OUTPUT_PATH",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_run_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        pipeline = "pipelines/classify.toml"
        max_objects = 20

        [input]
        video_path = "clips/*.mp4"
        batch_size = 2
        size_scale = 0.5

        [output]
        dir = "/var/lib/framepipe"
        save_json = true
        dump_store_state = true
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("FRAMEPIPE_RUN_CONFIG", file.path());
    std::env::set_var("FRAMEPIPE_INPUT_BATCH_SIZE", "8");
    std::env::set_var("FRAMEPIPE_OUTPUT_PATH", "/tmp/run.json");

    let cfg = RunConfig::load().expect("load config");
    clear_env();

    assert_eq!(
        cfg.pipeline.as_deref(),
        Some(std::path::Path::new("pipelines/classify.toml"))
    );
    assert_eq!(cfg.max_objects, 20);
    assert_eq!(cfg.source.video_path.as_deref(), Some("clips/*.mp4"));
    assert_eq!(cfg.source.batch_size, 8);
    assert_eq!(cfg.source.size_scale, Some(0.5));
    assert_eq!(cfg.source.output_dir.as_deref(), Some("/var/lib/framepipe"));
    assert!(cfg.output.save_json);
    assert!(cfg.output.export.store_state);
    assert!(!cfg.output.export.raw_data);
    assert_eq!(
        cfg.output.results_path(0, 1),
        std::path::PathBuf::from("/tmp/run.json")
    );
}

#[test]
fn env_alone_is_enough() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FRAMEPIPE_INPUT", "rtsp://camera-1/stream");
    std::env::set_var("FRAMEPIPE_MAX_OBJECTS", "3");
    let cfg = RunConfig::load().expect("load config");
    clear_env();

    assert_eq!(cfg.source.input.as_deref(), Some("rtsp://camera-1/stream"));
    assert_eq!(cfg.max_objects, 3);
    assert_eq!(cfg.source.batch_size, 1);
}

#[test]
fn invalid_env_values_are_configuration_errors() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("FRAMEPIPE_MAX_OBJECTS", "0");
    let err = RunConfig::load().expect_err("zero capacity");
    assert!(matches!(err, PipelineError::Configuration { .. }));

    std::env::set_var("FRAMEPIPE_MAX_OBJECTS", "many");
    let err = RunConfig::load().expect_err("not a number");
    assert!(err.to_string().contains("FRAMEPIPE_MAX_OBJECTS"));
    clear_env();
}

#[test]
fn invalid_transforms_fail_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"[input]\nimage_path = \"a.png\"\nsize_scale = -1.0\n")
        .expect("write config");
    let err = RunConfig::load_from(Some(file.path())).expect_err("negative scale");
    assert!(matches!(err, PipelineError::Configuration { .. }));
}

#[test]
fn missing_run_file_is_reported() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = RunConfig::load_from(Some(std::path::Path::new("/no/such/run.toml")))
        .expect_err("missing file");
    assert!(err.to_string().contains("/no/such/run.toml"));
}
