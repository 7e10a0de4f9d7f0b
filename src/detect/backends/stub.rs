use anyhow::{anyhow, Result};
use url::Url;

use crate::detect::backend::{ActionPredictor, HumanDetector};
use crate::frame::Frame;
use crate::task::{BBox, BoxPredictions, Prediction, Task};

/// Stub detector for testing. Returns a fixed set of boxes given in relative
/// (0..1) keyframe coordinates.
pub struct StubDetector {
    relative_boxes: Vec<BBox>,
}

impl StubDetector {
    /// One person covering the central half of the frame.
    pub fn centered() -> Self {
        Self::relative(vec![BBox::new(0.25, 0.25, 0.75, 0.75)])
    }

    /// Never detects anyone.
    pub fn empty() -> Self {
        Self::relative(Vec::new())
    }

    pub fn relative(relative_boxes: Vec<BBox>) -> Self {
        Self { relative_boxes }
    }

    /// `stub://person` or `stub://none`.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| anyhow!("invalid stub uri '{}': {}", uri, e))?;
        match url.host_str() {
            Some("person") => Ok(Self::centered()),
            Some("none") => Ok(Self::empty()),
            other => Err(anyhow!("unknown stub detector '{}'", other.unwrap_or(""))),
        }
    }
}

impl HumanDetector for StubDetector {
    fn name(&self) -> &str {
        "stub"
    }

    fn detect(&mut self, keyframe: &Frame) -> Result<Vec<BBox>> {
        let size = (keyframe.width() as f32, keyframe.height() as f32);
        Ok(self.relative_boxes.iter().map(|b| b.scale(size)).collect())
    }
}

/// Predictor that assigns the same predictions to every box.
pub struct FixedPredictor {
    name: String,
    preds: Vec<Prediction>,
}

impl FixedPredictor {
    pub fn new(name: impl Into<String>, preds: Vec<Prediction>) -> Self {
        Self {
            name: name.into(),
            preds,
        }
    }

    /// Drop fixed scores at or below `threshold`, as model members do when
    /// decoding.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.preds.retain(|pred| pred.score > threshold);
        self
    }

    /// `stub://fixed?<label>=<score>&...` or `stub://silent`.
    pub fn from_uri(name: &str, uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| anyhow!("invalid stub uri '{}': {}", uri, e))?;
        match url.host_str() {
            Some("silent") => Ok(Self::new(name, Vec::new())),
            Some("fixed") => {
                let mut preds = Vec::new();
                for (label, score) in url.query_pairs() {
                    let score: f32 = score.parse().map_err(|_| {
                        anyhow!("stub predictor score for '{}' is not a number", label)
                    })?;
                    preds.push(Prediction::new(label.into_owned(), score));
                }
                Ok(Self::new(name, preds))
            }
            other => Err(anyhow!("unknown stub predictor '{}'", other.unwrap_or(""))),
        }
    }
}

impl ActionPredictor for FixedPredictor {
    fn name(&self) -> &str {
        &self.name
    }

    fn predict(&mut self, task: &Task) -> Result<BoxPredictions> {
        Ok(vec![self.preds.clone(); task.detection_boxes().len()])
    }
}
