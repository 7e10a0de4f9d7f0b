//! Class-id to label lookup for action models.
//!
//! File format: one `"<class id>: <label>"` per line. Blank lines are skipped.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

use crate::task::Prediction;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LabelMap {
    labels: BTreeMap<u32, String>,
}

impl LabelMap {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read label map {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid label map {}", path.display()))
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let re = regex::Regex::new(r"^\s*(\d+)\s*:\s*(.*?)\s*$")
            .map_err(|e| anyhow!("label map pattern: {}", e))?;

        let mut labels = BTreeMap::new();
        for (lineno, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let caps = re
                .captures(line)
                .ok_or_else(|| anyhow!("line {}: expected '<id>: <label>'", lineno + 1))?;
            let id: u32 = caps[1]
                .parse()
                .map_err(|_| anyhow!("line {}: class id out of range", lineno + 1))?;
            let label = caps[2].to_string();
            if label.is_empty() {
                return Err(anyhow!("line {}: empty label for class {}", lineno + 1, id));
            }
            labels.insert(id, label);
        }
        Ok(Self { labels })
    }

    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u32, S)>,
        S: Into<String>,
    {
        Self {
            labels: pairs.into_iter().map(|(id, l)| (id, l.into())).collect(),
        }
    }

    /// Restrict to a model trained on a subset of classes: class `i + 1` of the
    /// model maps to the label of `custom_classes[i]`.
    pub fn with_custom_classes(&self, custom_classes: &[u32]) -> Result<Self> {
        let mut labels = BTreeMap::new();
        for (idx, class) in custom_classes.iter().enumerate() {
            let label = self
                .labels
                .get(class)
                .ok_or_else(|| anyhow!("custom class {} is not in the label map", class))?;
            labels.insert(idx as u32 + 1, label.clone());
        }
        Ok(Self { labels })
    }

    pub fn get(&self, id: u32) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Turn one box's per-class score row into labelled predictions.
    ///
    /// Row index `c` corresponds to class id `c + 1` (index 0 is the first
    /// foreground class). Classes missing from the map are skipped, and only
    /// scores strictly above `threshold` are kept.
    pub fn decode(&self, scores: &[f32], threshold: f32) -> Vec<Prediction> {
        scores
            .iter()
            .enumerate()
            .filter_map(|(idx, &score)| {
                let label = self.get(idx as u32 + 1)?;
                (score > threshold).then(|| Prediction::new(label, score))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_id_label_lines() {
        let map = LabelMap::parse("1: swimming\n\n2: drowning\n3: take (an object) from (a person)\n")
            .unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.get(2), Some("drowning"));
        assert_eq!(map.get(3), Some("take (an object) from (a person)"));
        assert_eq!(map.get(4), None);
    }

    #[test]
    fn malformed_line_is_rejected() {
        let err = LabelMap::parse("1: swimming\nnot a label\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn custom_classes_remap_ids() {
        let map = LabelMap::from_pairs([(5, "swimming"), (9, "drowning")]);
        let custom = map.with_custom_classes(&[9, 5]).unwrap();
        assert_eq!(custom.get(1), Some("drowning"));
        assert_eq!(custom.get(2), Some("swimming"));
        assert!(map.with_custom_classes(&[7]).is_err());
    }

    #[test]
    fn decode_keeps_mapped_scores_above_threshold() {
        let map = LabelMap::from_pairs([(1, "swimming"), (2, "drowning")]);
        let preds = map.decode(&[0.95, 0.4, 0.99], 0.5);
        assert_eq!(preds, vec![Prediction::new("swimming", 0.95)]);
        assert!(map.decode(&[0.5, 0.5], 0.5).is_empty());
    }
}
