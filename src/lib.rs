//! framepipe
//!
//! A frame-processing pipeline runtime. Frames are pulled from a source
//! (video files, image files, live streams, replayed captures), grouped into
//! batches of records, pushed through an ordered chain of blocks, and the
//! results are aggregated into a JSON document.
//!
//! # Module Structure
//!
//! - `frame`, `object`: the per-frame record and the results attached to it
//! - `store`: bounded cross-frame object store
//! - `block`, `pipeline`: the block contract, built-in blocks and the runner
//! - `predict`: named predictor backends used by the classifier block
//! - `ingest`: datasets per source kind and the source selector
//! - `provider`: datasets to batches, plus the run's output aggregator
//! - `output`: the exported results document
//! - `config`: run configuration for the CLI

use std::time::{SystemTime, UNIX_EPOCH};

pub mod block;
pub mod config;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod object;
pub mod output;
pub mod pipeline;
pub mod predict;
pub mod provider;
pub mod store;
pub mod ui;

pub use block::{Block, BlockRegistry, BlockSettings, StageSpec};
pub use config::RunConfig;
pub use error::{PipelineError, Result};
pub use frame::{Field, FieldValue, FrameRecord, Image};
pub use ingest::{select_providers, SourceSpec};
pub use object::{Classification, ObjectKind, SubObject};
pub use output::{ExportOptions, OutputData, RunInfo};
pub use pipeline::PipelineRunner;
pub use predict::{Prediction, Predictor, PredictorRegistry};
pub use provider::{Batch, Provider};
pub use store::{ObjectStore, TrackedObject};

/// Wall-clock seconds since the Unix epoch.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
