//! Frame containers and the model-input transform.
//!
//! - `Frame`: display-resolution RGB image tagged with its source sequence number.
//! - `ProcessedFrame`: model-resolution, channel-normalized `f32` pixels (HWC).
//! - `Preprocessor`: the fixed transform applied to every captured image.
//!
//! Both variants of a frame are produced once at capture time by the read stage.
//! Later stages only read `ProcessedFrame`s; `Frame`s are annotated in place.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Deserialize;

// ----------------------------------------------------------------------------
// Frame: display-resolution image
// ----------------------------------------------------------------------------

/// A captured frame at display resolution.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Position of this frame in the source stream, starting at 0.
    seq: u64,
    image: RgbImage,
}

impl Frame {
    pub fn new(seq: u64, image: RgbImage) -> Self {
        Self { seq, image }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

// ----------------------------------------------------------------------------
// ProcessedFrame: normalized model input
// ----------------------------------------------------------------------------

/// Resized and normalized frame used as model input.
///
/// Pixels are stored row-major, channel-last, in the channel order selected by
/// `Normalization::to_bgr`.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessedFrame {
    pub width: u32,
    pub height: u32,
    data: Vec<f32>,
}

impl ProcessedFrame {
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Value at `(x, y)` for channel `c`.
    pub fn at(&self, x: u32, y: u32, c: usize) -> f32 {
        self.data[((y * self.width + x) as usize) * 3 + c]
    }
}

/// Per-channel normalization applied after resizing.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Emit channels as BGR instead of the source RGB order.
    #[serde(default)]
    pub to_bgr: bool,
}

impl Default for Normalization {
    fn default() -> Self {
        // ImageNet statistics in 0..255 scale, the usual setting for clip backbones.
        Self {
            mean: [123.675, 116.28, 103.53],
            std: [58.395, 57.12, 57.375],
            to_bgr: false,
        }
    }
}

impl Normalization {
    pub fn validate(&self) -> Result<()> {
        if self.std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(anyhow!("normalization std values must be positive"));
        }
        if self.mean.iter().any(|m| !m.is_finite()) {
            return Err(anyhow!("normalization mean values must be finite"));
        }
        Ok(())
    }

    pub fn apply(&self, image: &RgbImage) -> ProcessedFrame {
        let mut data = Vec::with_capacity((image.width() * image.height() * 3) as usize);
        for pixel in image.pixels() {
            let [r, g, b] = pixel.0;
            let ordered = if self.to_bgr { [b, g, r] } else { [r, g, b] };
            for (c, value) in ordered.iter().enumerate() {
                data.push((*value as f32 - self.mean[c]) / self.std[c]);
            }
        }
        ProcessedFrame {
            width: image.width(),
            height: image.height(),
            data,
        }
    }
}

// ----------------------------------------------------------------------------
// Preprocessor
// ----------------------------------------------------------------------------

/// Fixed capture-time transform: resize to display size, and resize + normalize
/// to model input size.
#[derive(Clone, Debug)]
pub struct Preprocessor {
    display_size: (u32, u32),
    model_size: (u32, u32),
    norm: Normalization,
}

impl Preprocessor {
    pub fn new(display_size: (u32, u32), model_size: (u32, u32), norm: Normalization) -> Self {
        Self {
            display_size,
            model_size,
            norm,
        }
    }

    pub fn prepare(&self, seq: u64, raw: RgbImage) -> (Frame, ProcessedFrame) {
        let model_input = resize_to(&raw, self.model_size);
        let processed = self.norm.apply(&model_input);
        let display = if raw.dimensions() == self.display_size {
            raw
        } else {
            resize_to(&raw, self.display_size)
        };
        (Frame::new(seq, display), processed)
    }
}

fn resize_to(image: &RgbImage, (width, height): (u32, u32)) -> RgbImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}
