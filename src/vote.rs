//! Ensemble voting: merge N predictors' per-box outputs into one verdict.
//!
//! For each box the voter sums every member's score per label, divides by the
//! member count (a member that did not emit a label contributes 0), keeps only
//! the alert label, and drops it when the mean falls below the threshold. The
//! neutral label never survives, whatever its mean.

use std::collections::HashMap;

use anyhow::{anyhow, Result};

use crate::task::{BoxPredictions, Prediction};

pub const DEFAULT_ALERT_LABEL: &str = "drowning";
pub const DEFAULT_NEUTRAL_LABEL: &str = "swimming";
pub const DEFAULT_ALERT_THRESHOLD: f32 = 0.92;

/// Which labels survive voting and at what mean score.
#[derive(Clone, Debug, PartialEq)]
pub struct VotePolicy {
    pub alert_label: String,
    pub neutral_label: Option<String>,
    pub threshold: f32,
}

impl Default for VotePolicy {
    fn default() -> Self {
        Self {
            alert_label: DEFAULT_ALERT_LABEL.to_string(),
            neutral_label: Some(DEFAULT_NEUTRAL_LABEL.to_string()),
            threshold: DEFAULT_ALERT_THRESHOLD,
        }
    }
}

impl VotePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.alert_label.trim().is_empty() {
            return Err(anyhow!("alert label must not be empty"));
        }
        if self.neutral_label.as_deref() == Some(self.alert_label.as_str()) {
            return Err(anyhow!(
                "alert and neutral labels must differ (both '{}')",
                self.alert_label
            ));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(anyhow!(
                "alert threshold must be within [0, 1] (got {})",
                self.threshold
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct EnsembleVoter {
    policy: VotePolicy,
    members: usize,
}

impl EnsembleVoter {
    pub fn new(policy: VotePolicy, members: usize) -> Result<Self> {
        policy.validate()?;
        if members == 0 {
            return Err(anyhow!("ensemble needs at least one member"));
        }
        Ok(Self { policy, members })
    }

    pub fn policy(&self) -> &VotePolicy {
        &self.policy
    }

    pub fn members(&self) -> usize {
        self.members
    }

    /// Merge `outputs` (one entry per member) for `box_count` boxes.
    pub fn vote(&self, outputs: &[BoxPredictions], box_count: usize) -> Result<BoxPredictions> {
        if outputs.len() != self.members {
            return Err(anyhow!(
                "expected {} member outputs, got {}",
                self.members,
                outputs.len()
            ));
        }
        if let Some((member, output)) = outputs
            .iter()
            .enumerate()
            .find(|(_, output)| output.len() != box_count)
        {
            return Err(anyhow!(
                "member {} returned {} prediction sets for {} boxes",
                member,
                output.len(),
                box_count
            ));
        }

        Ok((0..box_count)
            .map(|idx| self.vote_box(outputs.iter().flat_map(|output| output[idx].iter())))
            .collect())
    }

    fn vote_box<'a>(&self, pairs: impl Iterator<Item = &'a Prediction>) -> Vec<Prediction> {
        let mut sums: HashMap<&str, f32> = HashMap::new();
        for pred in pairs {
            *sums.entry(pred.label.as_str()).or_insert(0.0) += pred.score;
        }

        let members = self.members as f32;
        sums.into_iter()
            .map(|(label, sum)| (label, sum / members))
            .filter(|(label, _)| Some(*label) != self.policy.neutral_label.as_deref())
            .filter(|(label, _)| *label == self.policy.alert_label)
            .filter(|(_, mean)| *mean >= self.policy.threshold)
            .map(|(label, mean)| Prediction::new(label, mean))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(threshold: f32) -> VotePolicy {
        VotePolicy {
            alert_label: "alert".to_string(),
            neutral_label: Some("neutral".to_string()),
            threshold,
        }
    }

    fn single_box(preds: &[(&str, f32)]) -> BoxPredictions {
        vec![preds
            .iter()
            .map(|(label, score)| Prediction::new(*label, *score))
            .collect()]
    }

    #[test]
    fn mean_counts_silent_members_as_zero() {
        let voter = EnsembleVoter::new(policy(0.5), 5).unwrap();
        let outputs = vec![
            single_box(&[("alert", 0.9)]),
            single_box(&[("alert", 0.9)]),
            single_box(&[("alert", 0.9)]),
            single_box(&[]),
            single_box(&[]),
        ];
        let merged = voter.vote(&outputs, 1).unwrap();
        assert_eq!(merged[0].len(), 1);
        assert_eq!(merged[0][0].label, "alert");
        assert!((merged[0][0].score - 0.54).abs() < 1e-5);
    }

    #[test]
    fn mean_of_all_members_is_sum_over_n() {
        let scores = [0.7_f32, 0.8, 0.95];
        let voter = EnsembleVoter::new(policy(0.0), scores.len()).unwrap();
        let outputs: Vec<_> = scores.iter().map(|s| single_box(&[("alert", *s)])).collect();
        let merged = voter.vote(&outputs, 1).unwrap();
        let expected = scores.iter().sum::<f32>() / scores.len() as f32;
        assert!((merged[0][0].score - expected).abs() < 1e-6);
    }

    #[test]
    fn neutral_label_never_survives() {
        let voter = EnsembleVoter::new(policy(0.0), 1).unwrap();
        let merged = voter.vote(&[single_box(&[("neutral", 1.0)])], 1).unwrap();
        assert!(merged[0].is_empty());
    }

    #[test]
    fn labels_outside_policy_are_dropped() {
        let voter = EnsembleVoter::new(policy(0.0), 1).unwrap();
        let merged = voter
            .vote(&[single_box(&[("wave", 0.99), ("alert", 0.2)])], 1)
            .unwrap();
        assert_eq!(merged[0], vec![Prediction::new("alert", 0.2)]);
    }

    #[test]
    fn mean_below_threshold_yields_empty_set() {
        let voter = EnsembleVoter::new(policy(0.5), 2).unwrap();
        let outputs = vec![single_box(&[("alert", 0.9)]), single_box(&[("alert", 0.05)])];
        let merged = voter.vote(&outputs, 1).unwrap();
        assert!(merged[0].is_empty());
    }

    #[test]
    fn boxes_are_voted_independently() {
        let voter = EnsembleVoter::new(policy(0.5), 2).unwrap();
        let a = vec![vec![Prediction::new("alert", 0.9)], vec![Prediction::new("alert", 0.1)]];
        let b = vec![vec![Prediction::new("alert", 0.8)], vec![]];
        let merged = voter.vote(&[a, b], 2).unwrap();
        assert!((merged[0][0].score - 0.85).abs() < 1e-6);
        assert!(merged[1].is_empty());
    }

    #[test]
    fn misaligned_member_output_is_an_error() {
        let voter = EnsembleVoter::new(policy(0.5), 2).unwrap();
        let outputs = vec![single_box(&[]), vec![]];
        assert!(voter.vote(&outputs, 1).is_err());
    }

    #[test]
    fn empty_ensemble_is_rejected() {
        assert!(EnsembleVoter::new(policy(0.5), 0).is_err());
    }
}
