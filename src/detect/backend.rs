use anyhow::Result;

use crate::frame::Frame;
use crate::task::{BBox, BoxPredictions, Task};

/// Person detector run on a task's keyframe.
///
/// Implementations are called from the process stage only; they may keep
/// model state between calls but must not retain frames.
pub trait HumanDetector: Send {
    /// Backend identifier.
    fn name(&self) -> &str;

    /// Person boxes `(x1, y1, x2, y2)` in keyframe (display) pixels.
    fn detect(&mut self, keyframe: &Frame) -> Result<Vec<BBox>>;

    /// Populate the task's display and detection boxes from its keyframe.
    fn predict(&mut self, task: &mut Task) -> Result<()> {
        let boxes = self.detect(task.keyframe()?)?;
        task.set_boxes(boxes);
        Ok(())
    }

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

/// One ensemble member: a spatio-temporal action classifier.
pub trait ActionPredictor: Send {
    /// Member identifier, used in logs.
    fn name(&self) -> &str;

    /// Predictions for every detection box of `task`, in box order.
    ///
    /// Only called when the task has at least one box. The returned vector must
    /// have exactly one (possibly empty) entry per box.
    fn predict(&mut self, task: &Task) -> Result<BoxPredictions>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
