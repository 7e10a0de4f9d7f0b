use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::detect::{DetectorSettings, LabelMap, MemberSettings};
use crate::frame::Normalization;
use crate::geometry::{
    ClipSettings, DEFAULT_CLIP_LEN, DEFAULT_FRAME_INTERVAL, DEFAULT_INPUT_SHORT_SIDE, DEFAULT_STEP,
    DEFAULT_VIS_LENGTH,
};
use crate::ingest::SourceConfig;
use crate::output::{image_format, DEFAULT_OUTPUT_FORMAT};
use crate::pipeline::{AlertSettings, PipelineSettings, DEFAULT_ALERT_REPEAT};
use crate::vote::{VotePolicy, DEFAULT_ALERT_LABEL, DEFAULT_ALERT_THRESHOLD, DEFAULT_NEUTRAL_LABEL};

const DEFAULT_SOURCE_URI: &str = "stub://camera";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_MEMBER_NAME: &str = "stub";
const DEFAULT_MEMBER_MODEL: &str = "stub://silent";

#[derive(Debug, Deserialize, Default)]
struct PipelineConfigFile {
    source: Option<SourceConfigFile>,
    clip: Option<ClipConfigFile>,
    display: Option<DisplayConfigFile>,
    output: Option<OutputConfigFile>,
    detector: Option<DetectorConfigFile>,
    ensemble: Option<EnsembleConfigFile>,
    vote: Option<VoteConfigFile>,
    alert: Option<AlertConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    live: Option<bool>,
    max_frames: Option<u64>,
    width: Option<u32>,
    height: Option<u32>,
    pace: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct ClipConfigFile {
    clip_len: Option<usize>,
    frame_interval: Option<usize>,
    step: Option<usize>,
    vis_length: Option<usize>,
    input_short_side: Option<u32>,
    normalization: Option<Normalization>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct OutputConfigFile {
    dir: Option<PathBuf>,
    format: Option<String>,
    fps: Option<f32>,
    preview: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    model: Option<String>,
    score_threshold: Option<f32>,
    person_class_id: Option<u32>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct EnsembleConfigFile {
    label_map: Option<PathBuf>,
    custom_classes: Option<Vec<u32>>,
    members: Option<Vec<MemberConfigFile>>,
}

#[derive(Debug, Deserialize)]
struct MemberConfigFile {
    name: String,
    model: String,
    score_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct VoteConfigFile {
    alert_label: Option<String>,
    neutral_label: Option<String>,
    threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    repeat_count: Option<usize>,
    snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputSettings {
    /// Directory for the numbered output frames. `None` disables the writer.
    pub dir: Option<PathBuf>,
    pub format: String,
    /// 0 uses the source's native rate.
    pub fps: f32,
    pub preview: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleSettings {
    pub label_map: Option<PathBuf>,
    pub custom_classes: Vec<u32>,
    pub members: Vec<MemberSettings>,
}

impl EnsembleSettings {
    /// Load the label map, remapped through `custom_classes` when set.
    pub fn load_label_map(&self) -> Result<Option<LabelMap>> {
        let Some(path) = &self.label_map else {
            return Ok(None);
        };
        let labels = LabelMap::load(path)?;
        if self.custom_classes.is_empty() {
            return Ok(Some(labels));
        }
        Ok(Some(labels.with_custom_classes(&self.custom_classes)?))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub pace_reads: bool,
    pub clip: ClipSettings,
    pub output: OutputSettings,
    pub detector: DetectorSettings,
    pub ensemble: EnsembleSettings,
    pub vote: VotePolicy,
    pub alert: AlertSettings,
}

impl PipelineConfig {
    /// Load from the file named by `CLIPWATCH_CONFIG` (if set), then apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CLIPWATCH_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => PipelineConfigFile::default(),
        };
        let (mut cfg, member_thresholds) = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.resolve_member_thresholds(&member_thresholds);
        cfg.validate()?;
        Ok(cfg)
    }

    /// Also returns each member's explicit threshold, resolved against the
    /// final vote threshold once env overrides are in.
    fn from_file(file: PipelineConfigFile) -> (Self, Vec<Option<f32>>) {
        let source_file = file.source.unwrap_or_default();
        let source = SourceConfig {
            uri: source_file
                .uri
                .unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
            live: source_file.live,
            max_frames: source_file.max_frames,
            width: source_file.width.unwrap_or(DEFAULT_SOURCE_WIDTH),
            height: source_file.height.unwrap_or(DEFAULT_SOURCE_HEIGHT),
        };

        let clip_file = file.clip.unwrap_or_default();
        let display = file.display.unwrap_or_default();
        let clip = ClipSettings {
            clip_len: clip_file.clip_len.unwrap_or(DEFAULT_CLIP_LEN),
            frame_interval: clip_file.frame_interval.unwrap_or(DEFAULT_FRAME_INTERVAL),
            step: clip_file.step.unwrap_or(DEFAULT_STEP),
            vis_length: clip_file.vis_length.unwrap_or(DEFAULT_VIS_LENGTH),
            input_short_side: clip_file
                .input_short_side
                .unwrap_or(DEFAULT_INPUT_SHORT_SIDE),
            display_width: display.width.unwrap_or(0),
            display_height: display.height.unwrap_or(0),
            normalization: clip_file.normalization.unwrap_or_default(),
        };

        let output_file = file.output.unwrap_or_default();
        let output = OutputSettings {
            dir: output_file.dir,
            format: output_file
                .format
                .unwrap_or_else(|| DEFAULT_OUTPUT_FORMAT.to_string()),
            fps: output_file.fps.unwrap_or(0.0),
            preview: output_file.preview.unwrap_or(false),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector_defaults = DetectorSettings::default();
        let detector = DetectorSettings {
            model: detector_file.model.unwrap_or(detector_defaults.model),
            score_threshold: detector_file
                .score_threshold
                .unwrap_or(detector_defaults.score_threshold),
            person_class_id: detector_file
                .person_class_id
                .unwrap_or(detector_defaults.person_class_id),
            input_size: detector_file
                .input_size
                .unwrap_or(detector_defaults.input_size),
        };

        let vote_file = file.vote.unwrap_or_default();
        let vote = VotePolicy {
            alert_label: vote_file
                .alert_label
                .unwrap_or_else(|| DEFAULT_ALERT_LABEL.to_string()),
            neutral_label: Some(
                vote_file
                    .neutral_label
                    .unwrap_or_else(|| DEFAULT_NEUTRAL_LABEL.to_string()),
            )
            .filter(|label| !label.trim().is_empty()),
            threshold: vote_file.threshold.unwrap_or(DEFAULT_ALERT_THRESHOLD),
        };

        let ensemble_file = file.ensemble.unwrap_or_default();
        let (members, member_thresholds): (Vec<_>, Vec<_>) = match ensemble_file.members {
            Some(members) => members
                .into_iter()
                .map(|member| {
                    let settings = MemberSettings {
                        name: member.name,
                        model: member.model,
                        score_threshold: vote.threshold,
                    };
                    (settings, member.score_threshold)
                })
                .unzip(),
            None => (
                vec![MemberSettings {
                    name: DEFAULT_MEMBER_NAME.to_string(),
                    model: DEFAULT_MEMBER_MODEL.to_string(),
                    score_threshold: vote.threshold,
                }],
                vec![None],
            ),
        };
        let ensemble = EnsembleSettings {
            label_map: ensemble_file.label_map,
            custom_classes: ensemble_file.custom_classes.unwrap_or_default(),
            members,
        };

        let alert_file = file.alert.unwrap_or_default();
        let alert = AlertSettings {
            repeat_count: alert_file.repeat_count.unwrap_or(DEFAULT_ALERT_REPEAT),
            snapshot_path: alert_file.snapshot_path,
        };

        let cfg = Self {
            source,
            pace_reads: source_file.pace.unwrap_or(true),
            clip,
            output,
            detector,
            ensemble,
            vote,
            alert,
        };
        (cfg, member_thresholds)
    }

    /// Members without their own threshold report at the vote threshold.
    fn resolve_member_thresholds(&mut self, explicit: &[Option<f32>]) {
        let threshold = self.vote.threshold;
        for (member, own) in self.ensemble.members.iter_mut().zip(explicit) {
            member.score_threshold = own.unwrap_or(threshold);
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("CLIPWATCH_INPUT") {
            if !uri.trim().is_empty() {
                self.source.uri = uri;
            }
        }
        if let Ok(dir) = std::env::var("CLIPWATCH_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output.dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(fps) = std::env::var("CLIPWATCH_OUTPUT_FPS") {
            self.output.fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("CLIPWATCH_OUTPUT_FPS must be a number"))?;
        }
        if let Ok(threshold) = std::env::var("CLIPWATCH_ALERT_THRESHOLD") {
            self.vote.threshold = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("CLIPWATCH_ALERT_THRESHOLD must be a number"))?;
        }
        if let Ok(path) = std::env::var("CLIPWATCH_SNAPSHOT_PATH") {
            if !path.trim().is_empty() {
                self.alert.snapshot_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    /// Checks everything that can be checked before the source is opened.
    pub fn validate(&self) -> Result<()> {
        if self.source.uri.trim().is_empty() {
            return Err(anyhow!("source uri must not be empty"));
        }
        self.clip.validate()?;
        self.vote.validate()?;

        if self.output.dir.is_none() && !self.output.preview {
            return Err(anyhow!(
                "no output configured: set output.dir or enable output.preview"
            ));
        }
        image_format(&self.output.format)?;
        if !self.output.fps.is_finite() || self.output.fps < 0.0 {
            return Err(anyhow!("output fps must be >= 0 (0 uses the source rate)"));
        }

        if !(0.0..=1.0).contains(&self.detector.score_threshold) {
            return Err(anyhow!("detector score_threshold must be within [0, 1]"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be > 0"));
        }

        if self.ensemble.members.is_empty() {
            return Err(anyhow!("ensemble needs at least one member"));
        }
        let mut names = HashSet::new();
        for member in &self.ensemble.members {
            if member.name.trim().is_empty() {
                return Err(anyhow!("ensemble member names must not be empty"));
            }
            if !names.insert(member.name.as_str()) {
                return Err(anyhow!("duplicate ensemble member '{}'", member.name));
            }
            if !member.model.starts_with("stub://") && self.ensemble.label_map.is_none() {
                return Err(anyhow!(
                    "ensemble member '{}' loads a model and needs ensemble.label_map",
                    member.name
                ));
            }
        }

        if self.alert.repeat_count == 0 {
            return Err(anyhow!("alert repeat_count must be > 0"));
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            clip: self.clip.clone(),
            output_fps: self.output.fps,
            pace_reads: self.pace_reads,
            alert: self.alert.clone(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<PipelineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))
    }
}
