//! Directory-of-images frame source.
//!
//! Reads `.jpg`, `.jpeg` and `.png` files in file-name order, one frame per
//! file. The first image fixes the stream's frame size; later images with a
//! different size are resized to match.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use super::{FrameSource, SourceConfig};

pub struct ImageDirSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
    frame_size: (u32, u32),
    max_frames: Option<u64>,
    live: bool,
    released: bool,
}

impl ImageDirSource {
    pub fn open(config: &SourceConfig) -> Result<Self> {
        let dir = PathBuf::from(config.uri.trim());
        let mut files = list_images(&dir)?;
        if files.is_empty() {
            return Err(anyhow!("no images found in {}", dir.display()));
        }
        files.sort();
        let first = image::open(&files[0])
            .with_context(|| format!("failed to decode {}", files[0].display()))?
            .to_rgb8();
        let frame_size = first.dimensions();
        log::info!(
            "ImageDirSource: opened {} ({} images, {}x{})",
            dir.display(),
            files.len(),
            frame_size.0,
            frame_size.1
        );
        Ok(Self {
            dir,
            files,
            next: 0,
            frame_size,
            max_frames: config.max_frames,
            live: config.live.unwrap_or(false),
            released: false,
        })
    }
}

impl FrameSource for ImageDirSource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        if self.released {
            return Err(anyhow!("image source {} already released", self.dir.display()));
        }
        if self.max_frames.is_some_and(|max| self.next as u64 >= max) {
            return Ok(None);
        }
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;
        let image = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();
        if image.dimensions() == self.frame_size {
            Ok(Some(image))
        } else {
            let (w, h) = self.frame_size;
            Ok(Some(imageops::resize(&image, w, h, FilterType::Triangle)))
        }
    }

    fn release(&mut self) -> Result<()> {
        self.released = true;
        log::info!(
            "ImageDirSource: released {} after {} frames",
            self.dir.display(),
            self.next
        );
        Ok(())
    }

    fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    fn is_live(&self) -> bool {
        self.live
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read image directory {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
            .unwrap_or(false);
        if is_image && path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}
