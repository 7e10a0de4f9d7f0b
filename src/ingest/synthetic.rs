//! Synthetic frame source (`stub://`) for tests and demos.
//!
//! Frames carry a deterministic gradient that shifts with the frame count and
//! changes "scene" every 50 frames. Finite when `max_frames` is set.

use anyhow::{anyhow, Result};
use image::RgbImage;

use super::{FrameSource, SourceConfig};

pub struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    scene_state: u8,
    released: bool,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if !config.uri.starts_with("stub://") {
            return Err(anyhow!("synthetic source requires a stub:// uri"));
        }
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!(
                "synthetic source needs a non-empty frame size (got {}x{})",
                config.width,
                config.height
            ));
        }
        log::info!(
            "SyntheticSource: opened {} ({}x{}, {} frames)",
            config.uri,
            config.width,
            config.height,
            config
                .max_frames
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unbounded".to_string())
        );
        Ok(Self {
            config,
            frame_count: 0,
            scene_state: 0,
            released: false,
        })
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn generate(&mut self) -> RgbImage {
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let offset = self.frame_count + self.scene_state as u64;
        RgbImage::from_fn(self.config.width, self.config.height, |x, y| {
            let base = (x as u64 + y as u64 + offset) % 256;
            image::Rgb([base as u8, (base as u8).wrapping_mul(3), self.scene_state])
        })
    }
}

impl FrameSource for SyntheticSource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        if self.released {
            return Err(anyhow!("synthetic source {} already released", self.config.uri));
        }
        if let Some(max) = self.config.max_frames {
            if self.frame_count >= max {
                return Ok(None);
            }
        }
        let image = self.generate();
        self.frame_count += 1;
        Ok(Some(image))
    }

    fn release(&mut self) -> Result<()> {
        self.released = true;
        log::info!(
            "SyntheticSource: released {} after {} frames",
            self.config.uri,
            self.frame_count
        );
        Ok(())
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn is_live(&self) -> bool {
        self.config.live.unwrap_or(self.config.max_frames.is_none())
    }
}
