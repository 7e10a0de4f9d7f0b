//! Frame ingestion sources.
//!
//! This module provides the sources the read stage pulls frames from:
//! - Synthetic `stub://` streams (testing, demos)
//! - Directories of still images, read in file-name order
//! - Video files and network streams (feature: ingest-ffmpeg)
//!
//! A source yields RGB images on demand and reports end-of-stream with
//! `Ok(None)`. Read errors are surfaced as `Err`; the read stage treats them as
//! end-of-stream and never retries.

#[cfg(feature = "ingest-ffmpeg")]
pub(crate) mod ffmpeg;
pub mod image_dir;
pub mod synthetic;

use std::path::Path;

use anyhow::{anyhow, Result};
use image::RgbImage;

pub use image_dir::ImageDirSource;
pub use synthetic::SyntheticSource;

/// A capture device or stream.
///
/// Implementations are owned by the pipeline and shared between the read
/// stage and cleanup behind a lock, so they only need to be `Send`.
pub trait FrameSource: Send {
    /// Next frame, or `None` once the stream is exhausted.
    fn read(&mut self) -> Result<Option<RgbImage>>;

    /// Release the underlying device. Called at most once by the pipeline.
    fn release(&mut self) -> Result<()>;

    /// Native frame size `(width, height)`.
    fn frame_size(&self) -> (u32, u32);

    /// Live sources produce frames in real time and are never paced.
    fn is_live(&self) -> bool {
        false
    }

    /// Native frame rate, if known.
    fn native_fps(&self) -> Option<f32> {
        None
    }
}

/// Configuration for opening a source.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceConfig {
    /// `stub://name`, a directory of images, or (with ingest-ffmpeg) a video path/URL.
    pub uri: String,
    /// Treat the source as live. `None` lets the source decide.
    pub live: Option<bool>,
    /// Stop after this many frames.
    pub max_frames: Option<u64>,
    /// Frame size for synthetic sources.
    pub width: u32,
    pub height: u32,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: "stub://camera".to_string(),
            live: None,
            max_frames: None,
            width: 640,
            height: 480,
        }
    }
}

/// Open the source described by `config`. Failure to open is fatal.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>> {
    let uri = config.uri.trim();
    if uri.is_empty() {
        return Err(anyhow!("source uri must not be empty"));
    }
    if uri.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())?));
    }
    if Path::new(uri).is_dir() {
        return Ok(Box::new(ImageDirSource::open(config)?));
    }
    #[cfg(feature = "ingest-ffmpeg")]
    {
        Ok(Box::new(ffmpeg::FfmpegSource::open(config)?))
    }
    #[cfg(not(feature = "ingest-ffmpeg"))]
    {
        Err(anyhow!(
            "source '{}' requires the ingest-ffmpeg feature (only stub:// and image directories are built in)",
            uri
        ))
    }
}
