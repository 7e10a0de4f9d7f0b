pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

use anyhow::{anyhow, Result};

pub use stub::{FixedPredictor, StubDetector};

#[cfg(feature = "backend-tract")]
pub use tract::{TractActionPredictor, TractHumanDetector};

use crate::detect::backend::{ActionPredictor, HumanDetector};
use crate::detect::label_map::LabelMap;
use crate::geometry::ClipGeometry;

pub const DEFAULT_DETECTOR_MODEL: &str = "stub://person";
pub const DEFAULT_DETECTOR_THRESHOLD: f32 = 0.6;
pub const DEFAULT_DETECTOR_INPUT_SIZE: u32 = 640;

#[derive(Clone, Debug, PartialEq)]
pub struct DetectorSettings {
    /// `stub://person`, `stub://none`, or an ONNX model path.
    pub model: String,
    pub score_threshold: f32,
    pub person_class_id: u32,
    pub input_size: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_DETECTOR_MODEL.to_string(),
            score_threshold: DEFAULT_DETECTOR_THRESHOLD,
            person_class_id: 0,
            input_size: DEFAULT_DETECTOR_INPUT_SIZE,
        }
    }
}

/// One ensemble member.
#[derive(Clone, Debug, PartialEq)]
pub struct MemberSettings {
    pub name: String,
    /// `stub://fixed?...`, `stub://silent`, or an ONNX model path.
    pub model: String,
    /// Per-class scores at or below this are not reported by the member.
    pub score_threshold: f32,
}

pub fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn HumanDetector>> {
    if settings.model.starts_with("stub://") {
        return Ok(Box::new(StubDetector::from_uri(&settings.model)?));
    }
    #[cfg(feature = "backend-tract")]
    {
        let detector = TractHumanDetector::new(&settings.model, settings.input_size)?
            .with_threshold(settings.score_threshold)
            .with_person_class(settings.person_class_id);
        Ok(Box::new(detector))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        Err(anyhow!(
            "detector model '{}' requires the backend-tract feature",
            settings.model
        ))
    }
}

pub fn build_predictor(
    settings: &MemberSettings,
    labels: Option<&LabelMap>,
    geometry: &ClipGeometry,
) -> Result<Box<dyn ActionPredictor>> {
    if settings.model.starts_with("stub://") {
        let predictor = FixedPredictor::from_uri(&settings.name, &settings.model)?
            .with_threshold(settings.score_threshold);
        return Ok(Box::new(predictor));
    }
    let labels = labels.ok_or_else(|| {
        anyhow!(
            "predictor '{}' needs a label map (ensemble.label_map)",
            settings.name
        )
    })?;
    #[cfg(feature = "backend-tract")]
    {
        let predictor = TractActionPredictor::new(
            settings.name.clone(),
            &settings.model,
            labels.clone(),
            geometry.clip_len(),
            geometry.model_size(),
        )?
        .with_threshold(settings.score_threshold);
        Ok(Box::new(predictor))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        let _ = (labels, geometry);
        Err(anyhow!(
            "predictor model '{}' requires the backend-tract feature",
            settings.model
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::ClipSettings;
    use crate::task::{BBox, Prediction, Task};
    use std::sync::Arc;

    #[test]
    fn stub_models_build_without_features() {
        let geometry = ClipGeometry::new(&ClipSettings::default(), (64, 48)).unwrap();
        assert!(build_detector(&DetectorSettings::default()).is_ok());
        let member = MemberSettings {
            name: "m1".to_string(),
            model: "stub://fixed?drowning=0.9".to_string(),
            score_threshold: 0.0,
        };
        let predictor = build_predictor(&member, None, &geometry).unwrap();
        assert_eq!(predictor.name(), "m1");
    }

    #[test]
    fn stub_member_threshold_filters_scores() {
        let geometry = ClipGeometry::new(&ClipSettings::default(), (64, 48)).unwrap();
        let member = MemberSettings {
            name: "m1".to_string(),
            model: "stub://fixed?drowning=0.9&swimming=0.3".to_string(),
            score_threshold: 0.5,
        };
        let mut predictor = build_predictor(&member, None, &geometry).unwrap();
        let mut task = Task::new(0, Vec::new(), Vec::new(), Arc::from(Vec::new()), (1.0, 1.0), 0);
        task.set_boxes(vec![BBox::new(0.0, 0.0, 4.0, 4.0)]);
        let preds = predictor.predict(&task).unwrap();
        assert_eq!(preds, vec![vec![Prediction::new("drowning", 0.9)]]);
    }

    #[test]
    fn model_predictor_requires_label_map() {
        let geometry = ClipGeometry::new(&ClipSettings::default(), (64, 48)).unwrap();
        let member = MemberSettings {
            name: "m1".to_string(),
            model: "models/m1.onnx".to_string(),
            score_threshold: 0.0,
        };
        let err = build_predictor(&member, None, &geometry).err().unwrap();
        assert!(err.to_string().contains("label map"));
    }
}
