//! clipwatch: sliding-window action detection over a video stream.
//!
//! A stream is cut into overlapping windows of frames. Each window becomes a
//! [`Task`] that is scored by a person detector and an ensemble of action
//! predictors whose verdicts are merged by score averaging. Annotated frames
//! come out in the original order even though tasks finish out of order.
//!
//! # Module Structure
//!
//! - `ingest`: frame sources (synthetic `stub://`, image directories, ffmpeg)
//! - `frame`: display frames and the normalized model-input transform
//! - `geometry`: window/step/overlap, sampled indices and size derivation
//! - `task`: one window plus its boxes and predictions
//! - `detect`: detector/predictor capabilities, backends and the label map
//! - `vote`: ensemble score averaging
//! - `render`: box overlays
//! - `output`: viewer/writer sinks and the alert snapshot
//! - `pipeline`: the concurrent read/process/display stages and lifecycle
//! - `config`: file + environment configuration for the binary

pub mod config;
pub mod detect;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod output;
pub mod pipeline;
pub mod render;
pub mod task;
pub mod vote;

pub use config::PipelineConfig;
pub use detect::{ActionPredictor, Ensemble, HumanDetector, LabelMap};
pub use frame::{Frame, Normalization, ProcessedFrame};
pub use geometry::{ClipGeometry, ClipSettings};
pub use ingest::{open_source, FrameSource, SourceConfig};
pub use output::{FrameSink, ImageSequenceWriter, MemorySink, PreviewSink};
pub use pipeline::{
    AlertSettings, Models, Pipeline, PipelineSettings, PipelineState, RunSummary, ShutdownHandle,
};
pub use render::{Annotator, BoxAnnotator};
pub use task::{BBox, BoxPredictions, Prediction, Task};
pub use vote::{EnsembleVoter, VotePolicy};
