#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use tract_onnx::prelude::*;

use crate::detect::backend::{ActionPredictor, HumanDetector};
use crate::detect::label_map::LabelMap;
use crate::frame::Frame;
use crate::task::{BBox, BoxPredictions, Task};

type Plan = TypedRunnableModel<TypedModel>;

fn load_plan(model_path: &Path, facts: &[TVec<usize>]) -> Result<Plan> {
    let mut model = tract_onnx::onnx()
        .model_for_path(model_path)
        .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?;
    for (idx, shape) in facts.iter().enumerate() {
        model = model
            .with_input_fact(idx, InferenceFact::dt_shape(f32::datum_type(), shape.clone()))
            .with_context(|| format!("failed to set input fact {}", idx))?;
    }
    model
        .into_optimized()
        .context("failed to optimize ONNX model")?
        .into_runnable()
        .context("failed to build runnable ONNX model")
}

fn first_output(outputs: &TVec<TValue>) -> Result<Vec<f32>> {
    let output = outputs
        .first()
        .ok_or_else(|| anyhow!("model produced no outputs"))?;
    let view = output
        .to_array_view::<f32>()
        .context("model output tensor was not f32")?;
    Ok(view.iter().copied().collect())
}

// ----------------------------------------------------------------------------
// Human detector
// ----------------------------------------------------------------------------

/// ONNX person detector.
///
/// Expects a `[1, 3, S, S]` RGB input scaled to 0..1 and an output of rows
/// `(x1, y1, x2, y2, score, class)` in input pixels.
pub struct TractHumanDetector {
    model: Plan,
    input_size: u32,
    score_threshold: f32,
    person_class_id: u32,
}

impl TractHumanDetector {
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let size = input_size as usize;
        let model = load_plan(model_path.as_ref(), &[tvec!(1, 3, size, size)])?;
        Ok(Self {
            model,
            input_size,
            score_threshold: 0.5,
            person_class_id: 0,
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn with_person_class(mut self, class_id: u32) -> Self {
        self.person_class_id = class_id;
        self
    }

    fn build_input(&self, keyframe: &Frame) -> Tensor {
        let size = self.input_size;
        let resized = imageops::resize(keyframe.image(), size, size, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        input.into_tensor()
    }
}

impl HumanDetector for TractHumanDetector {
    fn name(&self) -> &str {
        "tract"
    }

    fn detect(&mut self, keyframe: &Frame) -> Result<Vec<BBox>> {
        let input = self.build_input(keyframe);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX detector inference failed")?;
        let values = first_output(&outputs)?;
        if values.len() % 6 != 0 {
            return Err(anyhow!(
                "detector output has {} values, expected rows of 6",
                values.len()
            ));
        }

        let scale = (
            keyframe.width() as f32 / self.input_size as f32,
            keyframe.height() as f32 / self.input_size as f32,
        );
        Ok(values
            .chunks_exact(6)
            .filter(|row| row[5].round() as u32 == self.person_class_id)
            .filter(|row| row[4] >= self.score_threshold)
            .map(|row| BBox::new(row[0], row[1], row[2], row[3]).scale(scale))
            .collect())
    }
}

// ----------------------------------------------------------------------------
// Action predictor
// ----------------------------------------------------------------------------

/// ONNX spatio-temporal action model.
///
/// Inputs: the sampled clip `[1, 3, T, H, W]` and one region of interest
/// `[1, 5]` = `(0, x1, y1, x2, y2)` in model pixels. Output: one row of class
/// scores, decoded through the label map. Boxes are scored one at a time.
pub struct TractActionPredictor {
    name: String,
    model: Plan,
    labels: LabelMap,
    clip_len: usize,
    input_size: (u32, u32),
    score_threshold: f32,
}

impl TractActionPredictor {
    pub fn new<P: AsRef<Path>>(
        name: impl Into<String>,
        model_path: P,
        labels: LabelMap,
        clip_len: usize,
        input_size: (u32, u32),
    ) -> Result<Self> {
        let (w, h) = (input_size.0 as usize, input_size.1 as usize);
        let model = load_plan(
            model_path.as_ref(),
            &[tvec!(1, 3, clip_len, h, w), tvec!(1, 5)],
        )?;
        Ok(Self {
            name: name.into(),
            model,
            labels,
            clip_len,
            input_size,
            score_threshold: 0.0,
        })
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.score_threshold = threshold;
        self
    }

    fn build_clip(&self, task: &Task) -> Result<Tensor> {
        let frames = task.sampled_frames()?;
        if frames.len() != self.clip_len {
            return Err(anyhow!(
                "task {} sampled {} frames, model expects {}",
                task.id(),
                frames.len(),
                self.clip_len
            ));
        }
        let (w, h) = self.input_size;
        if let Some(frame) = frames.iter().find(|f| (f.width, f.height) != (w, h)) {
            return Err(anyhow!(
                "processed frame {}x{} does not match model input {}x{}",
                frame.width,
                frame.height,
                w,
                h
            ));
        }
        let clip = tract_ndarray::Array5::from_shape_fn(
            (1, 3, self.clip_len, h as usize, w as usize),
            |(_, c, t, y, x)| frames[t].at(x as u32, y as u32, c),
        );
        Ok(clip.into_tensor())
    }
}

impl ActionPredictor for TractActionPredictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&mut self, task: &Task) -> Result<BoxPredictions> {
        let clip = self.build_clip(task)?;
        let mut preds = Vec::with_capacity(task.detection_boxes().len());
        for bbox in task.detection_boxes() {
            let roi = tract_ndarray::arr2(&[[0.0f32, bbox.x1, bbox.y1, bbox.x2, bbox.y2]]);
            let outputs = self
                .model
                .run(tvec!(clip.clone().into(), roi.into_tensor().into()))
                .with_context(|| format!("ONNX inference failed for predictor '{}'", self.name))?;
            let scores = first_output(&outputs)?;
            preds.push(self.labels.decode(&scores, self.score_threshold));
        }
        Ok(preds)
    }
}
