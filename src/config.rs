//! Run configuration: where frames come from, which pipeline runs them and
//! what gets written afterwards.
//!
//! Loading order: optional TOML run file (path in `FRAMEPIPE_RUN_CONFIG`),
//! then `FRAMEPIPE_*` environment overrides, then validation.

use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::ingest::SourceSpec;
use crate::output::ExportOptions;
use crate::store::DEFAULT_MAX_OBJECTS;

const DEFAULT_OUTPUT_NAME: &str = "results.json";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RunConfigFile {
    pipeline: Option<PathBuf>,
    max_objects: Option<usize>,
    input: Option<SourceSpec>,
    output: Option<OutputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OutputConfigFile {
    dir: Option<PathBuf>,
    path: Option<PathBuf>,
    save_json: Option<bool>,
    save_replay: Option<PathBuf>,
    dump_raw_data: Option<bool>,
    dump_store_state: Option<bool>,
    dump_stage_state: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Pipeline TOML file.
    pub pipeline: Option<PathBuf>,
    pub max_objects: usize,
    pub source: SourceSpec,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Default)]
pub struct OutputSettings {
    pub dir: Option<PathBuf>,
    pub path: Option<PathBuf>,
    pub save_json: bool,
    /// Records file for a later replay; snapshots go next to it.
    pub save_replay: Option<PathBuf>,
    pub export: ExportOptions,
}

impl OutputSettings {
    /// Results file for the provider at `index`. With several providers and
    /// no explicit path, files are numbered inside the output directory.
    pub fn results_path(&self, index: usize, providers: usize) -> PathBuf {
        match (&self.path, providers) {
            (Some(path), 1) => path.clone(),
            (Some(path), _) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "results".to_string());
                path.with_file_name(format!("{}_{}.json", stem, index))
            }
            (None, 1) => self.dir_or_cwd().join(DEFAULT_OUTPUT_NAME),
            (None, _) => self.dir_or_cwd().join(format!("results_{}.json", index)),
        }
    }

    fn dir_or_cwd(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            pipeline: None,
            max_objects: DEFAULT_MAX_OBJECTS,
            source: SourceSpec::default(),
            output: OutputSettings::default(),
        }
    }
}

impl RunConfig {
    /// File named by `FRAMEPIPE_RUN_CONFIG` (if any), env overrides, validation.
    pub fn load() -> Result<Self> {
        let path = std::env::var("FRAMEPIPE_RUN_CONFIG")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => RunConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: RunConfigFile) -> Self {
        let output = file.output.unwrap_or_default();
        let mut source = file.input.unwrap_or_default();
        if source.output_dir.is_none() {
            source.output_dir = output
                .dir
                .as_ref()
                .map(|dir| dir.to_string_lossy().into_owned());
        }
        Self {
            pipeline: file.pipeline,
            max_objects: file.max_objects.unwrap_or(DEFAULT_MAX_OBJECTS),
            source,
            output: OutputSettings {
                dir: output.dir,
                path: output.path,
                save_json: output.save_json.unwrap_or(false),
                save_replay: output.save_replay,
                export: ExportOptions {
                    raw_data: output.dump_raw_data.unwrap_or(false),
                    store_state: output.dump_store_state.unwrap_or(false),
                    stage_state: output.dump_stage_state.unwrap_or(false),
                },
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_string("FRAMEPIPE_CONFIG") {
            self.pipeline = Some(PathBuf::from(path));
        }
        if let Some(input) = env_string("FRAMEPIPE_INPUT") {
            self.source.input = Some(input);
        }
        if let Some(batch) = env_string("FRAMEPIPE_INPUT_BATCH_SIZE") {
            self.source.batch_size = batch.parse().map_err(|_| {
                PipelineError::config("FRAMEPIPE_INPUT_BATCH_SIZE must be a positive integer")
            })?;
        }
        if let Some(max) = env_string("FRAMEPIPE_MAX_OBJECTS") {
            self.max_objects = max.parse().map_err(|_| {
                PipelineError::config("FRAMEPIPE_MAX_OBJECTS must be a positive integer")
            })?;
        }
        if let Some(dir) = env_string("FRAMEPIPE_OUTPUT_DIR") {
            self.source.output_dir = Some(dir.clone());
            self.output.dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = env_string("FRAMEPIPE_OUTPUT_PATH") {
            self.output.path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    pub fn validate(&mut self) -> Result<()> {
        if self.max_objects == 0 {
            return Err(PipelineError::config("max_objects must be at least 1"));
        }
        if self.source.batch_size == 0 {
            return Err(PipelineError::config("batch size must be at least 1"));
        }
        self.source.transforms()?;
        if self.source.state_path.is_some() && self.source.batch_size != 1 {
            return Err(PipelineError::config(
                "replaying store state requires batch size 1",
            ));
        }
        Ok(())
    }
}

/// Read a per-frame configuration override from a JSON file.
pub fn load_editable_config(path: &Path) -> Result<Value> {
    let raw = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => PipelineError::missing(path),
        _ => PipelineError::Io(e),
    })?;
    Ok(serde_json::from_slice(&raw)?)
}

fn read_config_file(path: &Path) -> Result<RunConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::config(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    toml::from_str(&raw)
        .map_err(|e| PipelineError::config(format!("invalid config file {}: {}", path.display(), e)))
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let cfg = RunConfig::from_file(RunConfigFile::default());
        assert_eq!(cfg.max_objects, DEFAULT_MAX_OBJECTS);
        assert_eq!(cfg.source.batch_size, 1);
        assert!(!cfg.output.save_json);
    }

    #[test]
    fn file_sections_map_to_settings() {
        let file: RunConfigFile = toml::from_str(
            r#"
            pipeline = "pipeline.toml"
            max_objects = 5
            [input]
            images_dir = "/data/frames"
            batch_size = 4
            width = 320
            height = 240
            [input.editable_config]
            zone = "north"
            [output]
            dir = "/tmp/out"
            save_json = true
            dump_stage_state = true
            "#,
        )
        .unwrap();
        let mut cfg = RunConfig::from_file(file);
        cfg.validate().unwrap();
        assert_eq!(cfg.max_objects, 5);
        assert_eq!(cfg.source.batch_size, 4);
        assert_eq!(cfg.source.images_dir, Some(PathBuf::from("/data/frames")));
        assert_eq!(cfg.source.output_dir.as_deref(), Some("/tmp/out"));
        assert_eq!(
            cfg.source.editable_config,
            Some(serde_json::json!({"zone": "north"}))
        );
        assert!(cfg.output.export.stage_state);
        assert!(!cfg.output.export.raw_data);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<RunConfigFile>("[input]\nvideo = \"x.mp4\"").is_err());
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut cfg = RunConfig::default();
        cfg.max_objects = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = RunConfig::default();
        cfg.source.state_path = Some("state.json".into());
        cfg.source.batch_size = 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn results_paths_for_one_and_many_providers() {
        let settings = OutputSettings {
            dir: Some("/out".into()),
            ..OutputSettings::default()
        };
        assert_eq!(settings.results_path(0, 1), PathBuf::from("/out/results.json"));
        assert_eq!(settings.results_path(2, 3), PathBuf::from("/out/results_2.json"));

        let settings = OutputSettings {
            path: Some("/out/run.json".into()),
            ..OutputSettings::default()
        };
        assert_eq!(settings.results_path(1, 2), PathBuf::from("/out/run_1.json"));
    }
}
