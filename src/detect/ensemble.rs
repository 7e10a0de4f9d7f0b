use anyhow::{anyhow, Context, Result};

use crate::task::{BoxPredictions, Task};

use super::backend::ActionPredictor;

/// Fixed set of action predictors, all run on every task with boxes.
pub struct Ensemble {
    members: Vec<Box<dyn ActionPredictor>>,
}

impl Ensemble {
    pub fn new(members: Vec<Box<dyn ActionPredictor>>) -> Result<Self> {
        if members.is_empty() {
            return Err(anyhow!("ensemble needs at least one predictor"));
        }
        Ok(Self { members })
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.name().to_string()).collect()
    }

    pub fn warm_up(&mut self) -> Result<()> {
        for member in &mut self.members {
            let name = member.name().to_string();
            member
                .warm_up()
                .with_context(|| format!("warm-up failed for predictor '{}'", name))?;
        }
        Ok(())
    }

    /// Run every member on `task`. Each output is checked against the box count.
    pub fn predict_all(&mut self, task: &Task) -> Result<Vec<BoxPredictions>> {
        let box_count = task.detection_boxes().len();
        let mut outputs = Vec::with_capacity(self.members.len());
        for member in &mut self.members {
            let preds = member
                .predict(task)
                .with_context(|| format!("predictor '{}' failed on task {}", member.name(), task.id()))?;
            if preds.len() != box_count {
                return Err(anyhow!(
                    "predictor '{}' returned {} prediction sets for {} boxes",
                    member.name(),
                    preds.len(),
                    box_count
                ));
            }
            outputs.push(preds);
        }
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::FixedPredictor;
    use crate::task::{BBox, Prediction};
    use std::sync::Arc;

    struct ShortPredictor;

    impl ActionPredictor for ShortPredictor {
        fn name(&self) -> &str {
            "short"
        }

        fn predict(&mut self, _task: &Task) -> Result<BoxPredictions> {
            Ok(Vec::new())
        }
    }

    fn task_with_boxes(count: usize) -> Task {
        let mut task = Task::new(0, Vec::new(), Vec::new(), Arc::from(Vec::new()), (1.0, 1.0), 0);
        task.set_boxes(vec![BBox::default(); count]);
        task
    }

    #[test]
    fn runs_every_member() {
        let mut ensemble = Ensemble::new(vec![
            Box::new(FixedPredictor::new("a", vec![Prediction::new("alert", 0.9)])),
            Box::new(FixedPredictor::new("b", vec![])),
        ])
        .unwrap();
        let outputs = ensemble.predict_all(&task_with_boxes(2)).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].len(), 2);
        assert!(outputs[1].iter().all(|p| p.is_empty()));
        assert_eq!(ensemble.names(), vec!["a", "b"]);
    }

    #[test]
    fn misaligned_member_is_an_error() {
        let mut ensemble = Ensemble::new(vec![Box::new(ShortPredictor)]).unwrap();
        assert!(ensemble.predict_all(&task_with_boxes(1)).is_err());
    }

    #[test]
    fn empty_ensemble_is_rejected() {
        assert!(Ensemble::new(Vec::new()).is_err());
    }
}
