//! Frame sinks for the display stage.
//!
//! The pipeline has up to two sinks: a viewer and a writer. Both receive every
//! emitted frame in display order and are released exactly once at cleanup.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::ImageFormat;

use crate::frame::Frame;

pub const DEFAULT_OUTPUT_FORMAT: &str = "jpg";

pub trait FrameSink: Send {
    fn name(&self) -> &str;

    fn write(&mut self, frame: &Frame) -> Result<()>;

    fn release(&mut self) -> Result<()>;
}

pub fn image_format(extension: &str) -> Result<ImageFormat> {
    match ImageFormat::from_extension(extension) {
        Some(format @ (ImageFormat::Jpeg | ImageFormat::Png)) => Ok(format),
        _ => Err(anyhow!(
            "unsupported output format '{}' (expected jpg or png)",
            extension
        )),
    }
}

// ----------------------------------------------------------------------------
// Image sequence writer
// ----------------------------------------------------------------------------

/// Writes frames as `frame_000000.<ext>`, `frame_000001.<ext>`, ... in `dir`.
pub struct ImageSequenceWriter {
    dir: PathBuf,
    extension: String,
    format: ImageFormat,
    written: u64,
    released: bool,
}

impl ImageSequenceWriter {
    pub fn create(dir: impl Into<PathBuf>, extension: &str) -> Result<Self> {
        let dir = dir.into();
        let format = image_format(extension)?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create output directory {}", dir.display()))?;
        Ok(Self {
            dir,
            extension: extension.to_ascii_lowercase(),
            format,
            written: 0,
            released: false,
        })
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    fn path_for(&self, index: u64) -> PathBuf {
        self.dir.join(format!("frame_{:06}.{}", index, self.extension))
    }
}

impl FrameSink for ImageSequenceWriter {
    fn name(&self) -> &str {
        "image-sequence"
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        if self.released {
            return Err(anyhow!("writer for {} already released", self.dir.display()));
        }
        let path = self.path_for(self.written);
        frame
            .image()
            .save_with_format(&path, self.format)
            .with_context(|| format!("failed to write frame {}", path.display()))?;
        self.written += 1;
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if !self.released {
            self.released = true;
            log::info!(
                "wrote {} frames to {}",
                self.written,
                self.dir.display()
            );
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Preview
// ----------------------------------------------------------------------------

/// Headless viewer: paces frames at the output rate and logs what it shows.
pub struct PreviewSink {
    interval: Duration,
    last_shown: Option<Instant>,
    shown: u64,
}

impl PreviewSink {
    pub fn new(fps: f32) -> Self {
        let interval = if fps > 0.0 {
            Duration::from_secs_f32(1.0 / fps)
        } else {
            Duration::ZERO
        };
        Self {
            interval,
            last_shown: None,
            shown: 0,
        }
    }
}

impl FrameSink for PreviewSink {
    fn name(&self) -> &str {
        "preview"
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        if let Some(last) = self.last_shown {
            let elapsed = last.elapsed();
            if elapsed < self.interval {
                std::thread::sleep(self.interval - elapsed);
            }
        }
        self.last_shown = Some(Instant::now());
        self.shown += 1;
        log::debug!(
            "preview frame seq={} ({}x{})",
            frame.seq(),
            frame.width(),
            frame.height()
        );
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        log::info!("preview closed after {} frames", self.shown);
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// In-memory sink
// ----------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    frames: Vec<Frame>,
    releases: usize,
}

/// Collects frames in memory. Clones share the same storage, so a caller can
/// keep one clone and hand the other to the pipeline.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Result<Vec<Frame>> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?;
        Ok(inner.frames.clone())
    }

    /// Sequence numbers of the collected frames, in arrival order.
    pub fn seqs(&self) -> Result<Vec<u64>> {
        Ok(self.frames()?.iter().map(Frame::seq).collect())
    }

    pub fn release_count(&self) -> Result<usize> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?;
        Ok(inner.releases)
    }
}

impl FrameSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    fn write(&mut self, frame: &Frame) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?;
        inner.frames.push(frame.clone());
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("memory sink lock poisoned"))?;
        inner.releases += 1;
        Ok(())
    }
}

/// Save one frame to `path`, creating parent directories. The format follows
/// the extension.
pub fn write_snapshot(path: &Path, frame: &Frame) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create snapshot directory {}", parent.display()))?;
    }
    frame
        .image()
        .save(path)
        .with_context(|| format!("failed to write snapshot {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn frame(seq: u64) -> Frame {
        Frame::new(seq, RgbImage::new(8, 6))
    }

    #[test]
    fn sequence_writer_numbers_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = ImageSequenceWriter::create(dir.path().join("out"), "png").unwrap();
        writer.write(&frame(7)).unwrap();
        writer.write(&frame(8)).unwrap();
        writer.release().unwrap();

        assert_eq!(writer.written(), 2);
        assert!(dir.path().join("out/frame_000000.png").exists());
        assert!(dir.path().join("out/frame_000001.png").exists());
        assert!(writer.write(&frame(9)).is_err());
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ImageSequenceWriter::create(dir.path(), "gif").is_err());
        assert!(image_format("JPG").is_ok());
    }

    #[test]
    fn memory_sink_clones_share_frames() {
        let sink = MemorySink::new();
        let mut handle = sink.clone();
        handle.write(&frame(1)).unwrap();
        handle.write(&frame(2)).unwrap();
        handle.release().unwrap();
        assert_eq!(sink.seqs().unwrap(), vec![1, 2]);
        assert_eq!(sink.release_count().unwrap(), 1);
    }

    #[test]
    fn snapshot_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts/snapshot.jpg");
        write_snapshot(&path, &frame(0)).unwrap();
        assert!(path.exists());
    }
}
