//! Sliding-window geometry fixed at pipeline construction.
//!
//! Everything here is derived once from the clip settings and the source frame
//! size: window/step/overlap, the sampled frame indices, the display window,
//! model input size, display size and the coordinate ratio between them.

use std::ops::Range;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::frame::Normalization;

pub const DEFAULT_CLIP_LEN: usize = 8;
pub const DEFAULT_FRAME_INTERVAL: usize = 8;
pub const DEFAULT_STEP: usize = 8;
pub const DEFAULT_VIS_LENGTH: usize = 8;
pub const DEFAULT_INPUT_SHORT_SIDE: u32 = 256;

/// Clip sampling and display settings.
#[derive(Clone, Debug, PartialEq)]
pub struct ClipSettings {
    /// Frames sampled per clip for inference.
    pub clip_len: usize,
    /// Stride between sampled frames.
    pub frame_interval: usize,
    /// Fresh frames read between consecutive tasks.
    pub step: usize,
    /// Frames per task that receive annotations.
    pub vis_length: usize,
    /// Short side of the model input after rescale.
    pub input_short_side: u32,
    /// Requested display width (0 = derive).
    pub display_width: u32,
    /// Requested display height (0 = derive).
    pub display_height: u32,
    pub normalization: Normalization,
}

impl Default for ClipSettings {
    fn default() -> Self {
        Self {
            clip_len: DEFAULT_CLIP_LEN,
            frame_interval: DEFAULT_FRAME_INTERVAL,
            step: DEFAULT_STEP,
            vis_length: DEFAULT_VIS_LENGTH,
            input_short_side: DEFAULT_INPUT_SHORT_SIDE,
            display_width: 0,
            display_height: 0,
            normalization: Normalization::default(),
        }
    }
}

impl ClipSettings {
    pub fn window(&self) -> usize {
        self.clip_len * self.frame_interval
    }

    /// Checks that do not depend on the source.
    pub fn validate(&self) -> Result<()> {
        if self.clip_len == 0 || self.frame_interval == 0 {
            return Err(anyhow!("clip_len and frame_interval must be > 0"));
        }
        if self.clip_len % 2 != 0 {
            return Err(anyhow!("clip_len must be even (got {})", self.clip_len));
        }
        let window = self.window();
        if window % 2 != 0 {
            return Err(anyhow!("window size must be even (got {})", window));
        }
        if self.step == 0 || self.step > window {
            return Err(anyhow!(
                "step must satisfy 0 < step <= window size (step={}, window={})",
                self.step,
                window
            ));
        }
        if self.vis_length > self.step {
            return Err(anyhow!(
                "vis_length ({}) must not exceed step ({})",
                self.vis_length,
                self.step
            ));
        }
        if self.input_short_side == 0 {
            return Err(anyhow!("input_short_side must be > 0"));
        }
        self.normalization.validate()
    }
}

#[derive(Clone, Debug)]
pub struct ClipGeometry {
    clip_len: usize,
    frame_interval: usize,
    window: usize,
    step: usize,
    vis_length: usize,
    sample_indices: Arc<[usize]>,
    display_start: usize,
    source_size: (u32, u32),
    display_size: (u32, u32),
    model_size: (u32, u32),
    ratio: (f32, f32),
    normalization: Normalization,
}

impl ClipGeometry {
    pub fn new(settings: &ClipSettings, source_size: (u32, u32)) -> Result<Self> {
        settings.validate()?;
        let (width, height) = source_size;
        if width == 0 || height == 0 {
            return Err(anyhow!("source reported an empty frame size {}x{}", width, height));
        }

        let window = settings.window();
        let frame_start = window / 2 - (settings.clip_len / 2) * settings.frame_interval;
        let sample_indices: Arc<[usize]> = (0..settings.clip_len)
            .map(|i| frame_start + settings.frame_interval * i)
            .collect();

        let model_size = rescale_short_side(source_size, settings.input_short_side);
        let display_size = match (settings.display_width, settings.display_height) {
            (0, 0) => source_size,
            (w, h) if w > 0 && h > 0 => (w, h),
            (w, h) => rescale_long_side(source_size, w.max(h)),
        };
        let ratio = (
            model_size.0 as f32 / display_size.0 as f32,
            model_size.1 as f32 / display_size.1 as f32,
        );

        Ok(Self {
            clip_len: settings.clip_len,
            frame_interval: settings.frame_interval,
            window,
            step: settings.step,
            vis_length: settings.vis_length,
            sample_indices,
            display_start: window / 2 - settings.step / 2,
            source_size,
            display_size,
            model_size,
            ratio,
            normalization: settings.normalization.clone(),
        })
    }

    pub fn clip_len(&self) -> usize {
        self.clip_len
    }

    pub fn frame_interval(&self) -> usize {
        self.frame_interval
    }

    pub fn window(&self) -> usize {
        self.window
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Frames carried from one task into the next.
    pub fn overlap(&self) -> usize {
        self.window - self.step
    }

    pub fn vis_length(&self) -> usize {
        self.vis_length
    }

    pub fn sample_indices(&self) -> Arc<[usize]> {
        self.sample_indices.clone()
    }

    /// The middle window of `step` frames shown for a regular task.
    pub fn display_indices(&self) -> Range<usize> {
        self.display_start..self.display_start + self.step
    }

    pub fn source_size(&self) -> (u32, u32) {
        self.source_size
    }

    pub fn display_size(&self) -> (u32, u32) {
        self.display_size
    }

    pub fn model_size(&self) -> (u32, u32) {
        self.model_size
    }

    pub fn ratio(&self) -> (f32, f32) {
        self.ratio
    }

    pub fn normalization(&self) -> &Normalization {
        &self.normalization
    }

    /// Frames a task contributes to the output, given its position in the stream.
    pub fn emit_range(&self, task_id: u64, end_of_stream: bool, frame_count: usize) -> Range<usize> {
        let display = self.display_indices();
        let range = match (task_id == 0, end_of_stream) {
            (true, true) => 0..frame_count,
            (true, false) => 0..display.end,
            (false, true) => display.start..frame_count,
            (false, false) => display,
        };
        range.start.min(frame_count)..range.end.min(frame_count)
    }
}

/// Scale `size` so its short side equals `short_side`, keeping aspect ratio.
fn rescale_short_side((w, h): (u32, u32), short_side: u32) -> (u32, u32) {
    let scale = short_side as f64 / w.min(h) as f64;
    scaled((w, h), scale)
}

/// Scale `size` so its long side equals `long_side`, keeping aspect ratio.
fn rescale_long_side((w, h): (u32, u32), long_side: u32) -> (u32, u32) {
    let scale = long_side as f64 / w.max(h) as f64;
    scaled((w, h), scale)
}

fn scaled((w, h): (u32, u32), scale: f64) -> (u32, u32) {
    let w = (w as f64 * scale + 0.5) as u32;
    let h = (h as f64 * scale + 0.5) as u32;
    (w.max(1), h.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(clip_len: usize, frame_interval: usize, step: usize, vis_length: usize) -> ClipSettings {
        ClipSettings {
            clip_len,
            frame_interval,
            step,
            vis_length,
            ..ClipSettings::default()
        }
    }

    #[test]
    fn odd_clip_len_is_rejected() {
        let err = ClipGeometry::new(&settings(3, 2, 2, 2), (64, 48)).unwrap_err();
        assert!(err.to_string().contains("even"));
    }

    #[test]
    fn step_must_be_within_window() {
        assert!(ClipGeometry::new(&settings(2, 2, 0, 0), (64, 48)).is_err());
        assert!(ClipGeometry::new(&settings(2, 2, 5, 2), (64, 48)).is_err());
        assert!(ClipGeometry::new(&settings(2, 2, 4, 2), (64, 48)).is_ok());
    }

    #[test]
    fn vis_length_must_not_exceed_step() {
        let err = ClipGeometry::new(&settings(4, 2, 2, 3), (64, 48)).unwrap_err();
        assert!(err.to_string().contains("vis_length"));
    }

    #[test]
    fn sample_indices_are_centered_in_window() {
        let geometry = ClipGeometry::new(&settings(8, 8, 8, 8), (320, 240)).unwrap();
        assert_eq!(geometry.window(), 64);
        assert_eq!(geometry.overlap(), 56);
        assert_eq!(&*geometry.sample_indices(), &[0, 8, 16, 24, 32, 40, 48, 56]);
        assert_eq!(geometry.display_indices(), 28..36);
    }

    #[test]
    fn model_and_display_sizes_follow_source_aspect() {
        let geometry = ClipGeometry::new(&settings(4, 1, 2, 2), (640, 480)).unwrap();
        assert_eq!(geometry.model_size(), (341, 256));
        assert_eq!(geometry.display_size(), (640, 480));

        let mut scaled = settings(4, 1, 2, 2);
        scaled.display_height = 320;
        let geometry = ClipGeometry::new(&scaled, (640, 480)).unwrap();
        assert_eq!(geometry.display_size(), (320, 240));
        let (rx, ry) = geometry.ratio();
        assert!((rx - 341.0 / 320.0).abs() < 1e-6);
        assert!((ry - 256.0 / 240.0).abs() < 1e-6);
    }

    #[test]
    fn emit_ranges_cover_the_stream_once() {
        let geometry = ClipGeometry::new(&settings(4, 1, 2, 2), (8, 8)).unwrap();
        assert_eq!(geometry.emit_range(0, false, 4), 0..3);
        assert_eq!(geometry.emit_range(1, false, 4), 1..3);
        assert_eq!(geometry.emit_range(4, true, 2), 1..2);
        assert_eq!(geometry.emit_range(0, true, 3), 0..3);
        assert_eq!(geometry.emit_range(2, true, 0), 0..0);
    }
}
