//! The unit of work flowing through the pipeline.
//!
//! A `Task` is one sliding-window clip plus everything derived from it. It is
//! created by the read stage, filled in by the process stage (boxes,
//! predictions, annotated frames) and consumed by the display stage.
//! Ownership moves across every stage boundary, so no two contexts ever hold
//! the same `Task`.

use std::ops::Range;
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::frame::{Frame, ProcessedFrame};

/// One `(label, score)` pair for a box.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub label: String,
    pub score: f32,
}

impl Prediction {
    pub fn new(label: impl Into<String>, score: f32) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Per-box predictions: the outer vector is indexed by box.
pub type BoxPredictions = Vec<Vec<Prediction>>;

/// Axis-aligned box `(x1, y1, x2, y2)` in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Scale x coordinates by `rx` and y coordinates by `ry`.
    pub fn scale(&self, (rx, ry): (f32, f32)) -> Self {
        Self {
            x1: self.x1 * rx,
            y1: self.y1 * ry,
            x2: self.x2 * rx,
            y2: self.y2 * ry,
        }
    }
}

// ----------------------------------------------------------------------------
// Task
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct Task {
    id: u64,
    frames: Vec<Frame>,
    processed_frames: Vec<ProcessedFrame>,
    sample_indices: Arc<[usize]>,
    /// model size / display size, per axis.
    ratio: (f32, f32),
    /// Number of frames around the keyframe that receive annotations.
    vis_length: usize,
    display_boxes: Vec<BBox>,
    detection_boxes: Vec<BBox>,
    predictions: BoxPredictions,
    end_of_stream: bool,
}

impl Task {
    pub fn new(
        id: u64,
        frames: Vec<Frame>,
        processed_frames: Vec<ProcessedFrame>,
        sample_indices: Arc<[usize]>,
        ratio: (f32, f32),
        vis_length: usize,
    ) -> Self {
        Self {
            id,
            frames,
            processed_frames,
            sample_indices,
            ratio,
            vis_length,
            display_boxes: Vec::new(),
            detection_boxes: Vec::new(),
            predictions: Vec::new(),
            end_of_stream: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut [Frame] {
        &mut self.frames
    }

    pub fn processed_frames(&self) -> &[ProcessedFrame] {
        &self.processed_frames
    }

    pub fn sample_indices(&self) -> &[usize] {
        &self.sample_indices
    }

    /// Processed frames selected for inference, in sampling order.
    pub fn sampled_frames(&self) -> Result<Vec<&ProcessedFrame>> {
        self.sample_indices
            .iter()
            .map(|&idx| {
                self.processed_frames.get(idx).ok_or_else(|| {
                    anyhow!(
                        "task {}: sample index {} out of range ({} processed frames)",
                        self.id,
                        idx,
                        self.processed_frames.len()
                    )
                })
            })
            .collect()
    }

    pub fn ratio(&self) -> (f32, f32) {
        self.ratio
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub(crate) fn mark_end_of_stream(&mut self) {
        self.end_of_stream = true;
    }

    /// Index of the temporal midpoint frame.
    pub fn keyframe_index(&self) -> usize {
        self.frames.len() / 2
    }

    pub fn keyframe(&self) -> Result<&Frame> {
        self.frames
            .get(self.keyframe_index())
            .ok_or_else(|| anyhow!("task {} has no frames", self.id))
    }

    /// Frames that receive annotations: `vis_length` frames around the keyframe.
    pub fn draw_range(&self) -> Range<usize> {
        if self.vis_length == 0 || self.frames.is_empty() {
            return 0..0;
        }
        let keyframe = self.keyframe_index();
        let start = keyframe.saturating_sub(self.vis_length / 2);
        let end = (start + self.vis_length).min(self.frames.len());
        start..end
    }

    pub fn display_boxes(&self) -> &[BBox] {
        &self.display_boxes
    }

    pub fn detection_boxes(&self) -> &[BBox] {
        &self.detection_boxes
    }

    pub fn predictions(&self) -> &[Vec<Prediction>] {
        &self.predictions
    }

    /// Install boxes in display coordinates and derive model-space boxes.
    ///
    /// Any previous predictions are discarded.
    pub fn set_boxes(&mut self, display_boxes: Vec<BBox>) {
        self.detection_boxes = display_boxes.iter().map(|b| b.scale(self.ratio)).collect();
        self.display_boxes = display_boxes;
        self.predictions.clear();
    }

    /// Install per-box predictions. Must align with the current boxes.
    pub fn set_predictions(&mut self, predictions: BoxPredictions) -> Result<()> {
        if predictions.len() != self.detection_boxes.len() {
            return Err(anyhow!(
                "task {}: {} prediction sets for {} boxes",
                self.id,
                predictions.len(),
                self.detection_boxes.len()
            ));
        }
        self.predictions = predictions;
        Ok(())
    }

    /// Drop every box whose prediction set is empty, keeping all lists aligned.
    pub fn retain_predicted_boxes(&mut self) {
        let display = std::mem::take(&mut self.display_boxes);
        let detection = std::mem::take(&mut self.detection_boxes);
        let predictions = std::mem::take(&mut self.predictions);
        for ((display_box, detection_box), preds) in display.into_iter().zip(detection).zip(predictions)
        {
            if preds.is_empty() {
                continue;
            }
            self.display_boxes.push(display_box);
            self.detection_boxes.push(detection_box);
            self.predictions.push(preds);
        }
    }

    pub fn has_predictions(&self) -> bool {
        self.predictions.iter().any(|p| !p.is_empty())
    }

    /// Split into the parts needed by the annotator.
    pub(crate) fn annotation_parts(&mut self) -> (&mut [Frame], &[BBox], &[Vec<Prediction>]) {
        (&mut self.frames, &self.display_boxes, &self.predictions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    fn make_task(frame_count: usize, vis_length: usize) -> Task {
        let frames = (0..frame_count as u64)
            .map(|seq| Frame::new(seq, RgbImage::new(4, 4)))
            .collect();
        Task::new(
            3,
            frames,
            Vec::new(),
            Arc::from(vec![0usize, 2]),
            (0.5, 0.25),
            vis_length,
        )
    }

    #[test]
    fn boxes_are_scaled_into_model_space() {
        let mut task = make_task(4, 2);
        task.set_boxes(vec![BBox::new(10.0, 20.0, 30.0, 40.0)]);
        assert_eq!(task.detection_boxes()[0], BBox::new(5.0, 5.0, 15.0, 10.0));
        assert_eq!(task.display_boxes()[0], BBox::new(10.0, 20.0, 30.0, 40.0));
    }

    #[test]
    fn misaligned_predictions_are_rejected() {
        let mut task = make_task(4, 2);
        task.set_boxes(vec![BBox::default(), BBox::default()]);
        assert!(task.set_predictions(vec![vec![]]).is_err());
        assert!(task.set_predictions(vec![vec![], vec![]]).is_ok());
    }

    #[test]
    fn empty_prediction_sets_drop_their_boxes() {
        let mut task = make_task(4, 2);
        task.set_boxes(vec![
            BBox::new(0.0, 0.0, 1.0, 1.0),
            BBox::new(2.0, 2.0, 3.0, 3.0),
            BBox::new(4.0, 4.0, 5.0, 5.0),
        ]);
        task.set_predictions(vec![
            vec![],
            vec![Prediction::new("alert", 0.9)],
            vec![],
        ])
        .unwrap();
        task.retain_predicted_boxes();
        assert_eq!(task.display_boxes(), &[BBox::new(2.0, 2.0, 3.0, 3.0)]);
        assert_eq!(task.detection_boxes().len(), 1);
        assert_eq!(task.predictions().len(), 1);
    }

    #[test]
    fn draw_range_centers_on_keyframe() {
        assert_eq!(make_task(8, 4).draw_range(), 2..6);
        assert_eq!(make_task(8, 3).draw_range(), 3..6);
        assert_eq!(make_task(8, 0).draw_range(), 0..0);
    }

    #[test]
    fn sample_index_out_of_range_is_an_error() {
        let task = make_task(4, 2);
        assert!(task.sampled_frames().is_err());
    }
}
