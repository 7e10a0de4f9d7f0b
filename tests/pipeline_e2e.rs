use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use image::RgbImage;

use clipwatch::detect::{FixedPredictor, StubDetector};
use clipwatch::output::FrameSink;
use clipwatch::{
    ActionPredictor, AlertSettings, BoxAnnotator, BoxPredictions, ClipSettings, Ensemble,
    EnsembleVoter, FrameSource, MemorySink, Models, Pipeline, PipelineSettings, PipelineState, Prediction,
    SourceConfig, Task, VotePolicy,
};

fn finite_source(frames: u64) -> SourceConfig {
    SourceConfig {
        uri: "stub://camera".to_string(),
        live: None,
        max_frames: Some(frames),
        width: 32,
        height: 24,
    }
}

/// Window 4 (clip_len 4 x interval 1), step 2, two annotated frames per task.
fn small_window() -> PipelineSettings {
    PipelineSettings {
        clip: ClipSettings {
            clip_len: 4,
            frame_interval: 1,
            step: 2,
            vis_length: 2,
            input_short_side: 16,
            ..ClipSettings::default()
        },
        output_fps: 0.0,
        pace_reads: false,
        alert: AlertSettings::default(),
    }
}

fn fixed(name: &str, preds: &[(&str, f32)]) -> Box<dyn ActionPredictor> {
    let preds = preds
        .iter()
        .map(|(label, score)| Prediction::new(*label, *score))
        .collect();
    Box::new(FixedPredictor::new(name, preds))
}

/// Three members say drowning=0.9, two say nothing: mean 0.54.
fn five_member_models(threshold: f32) -> Models {
    let members = vec![
        fixed("a", &[("drowning", 0.9)]),
        fixed("b", &[("drowning", 0.9)]),
        fixed("c", &[("drowning", 0.9), ("swimming", 0.95)]),
        fixed("d", &[]),
        fixed("e", &[]),
    ];
    let ensemble = Ensemble::new(members).unwrap();
    let policy = VotePolicy {
        threshold,
        ..VotePolicy::default()
    };
    Models {
        detector: Box::new(StubDetector::centered()),
        voter: EnsembleVoter::new(policy, ensemble.len()).unwrap(),
        ensemble,
        annotator: Box::new(BoxAnnotator::default()),
    }
}

fn build(
    source: SourceConfig,
    settings: PipelineSettings,
    models: Models,
) -> (Pipeline, MemorySink) {
    let sink = MemorySink::new();
    let source = clipwatch::open_source(&source).unwrap();
    let pipeline = Pipeline::new(
        source,
        settings,
        models,
        None,
        Some(Box::new(sink.clone()) as Box<dyn FrameSink>),
    )
    .unwrap();
    (pipeline, sink)
}

#[test]
fn ten_frames_come_out_once_and_in_order() {
    let (mut pipeline, sink) = build(finite_source(10), small_window(), five_member_models(0.5));

    pipeline.start().unwrap();
    pipeline.run().unwrap();
    let summary = pipeline.join().unwrap();
    pipeline.cleanup().unwrap();

    assert_eq!(sink.seqs().unwrap(), (0..10).collect::<Vec<u64>>());
    assert_eq!(summary.tasks_read, 5);
    assert_eq!(summary.tasks_processed, 4);
    assert_eq!(summary.frames_emitted, 10);
}

#[test]
fn vote_mean_above_threshold_annotates_and_fires_alert() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("alert.jpg");
    let mut settings = small_window();
    settings.alert = AlertSettings {
        repeat_count: 2,
        snapshot_path: Some(snapshot.clone()),
    };
    let (mut pipeline, sink) = build(finite_source(10), settings, five_member_models(0.5));

    pipeline.start().unwrap();
    pipeline.run().unwrap();
    let summary = pipeline.join().unwrap();

    assert!(summary.alert_fired);
    assert!(snapshot.exists());
    // Frame 1 is inside task 0's draw range; the box's top edge is at y=6.
    let frames = sink.frames().unwrap();
    assert_eq!(frames[1].image().get_pixel(15, 6).0, [255, 0, 0]);
}

#[test]
fn vote_mean_below_threshold_leaves_frames_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("alert.jpg");
    let mut settings = small_window();
    settings.alert = AlertSettings {
        repeat_count: 1,
        snapshot_path: Some(snapshot.clone()),
    };
    let (mut pipeline, sink) = build(finite_source(10), settings, five_member_models(0.6));

    pipeline.start().unwrap();
    pipeline.run().unwrap();
    let summary = pipeline.join().unwrap();

    assert!(!summary.alert_fired);
    assert!(!snapshot.exists());
    assert_ne!(sink.frames().unwrap()[1].image().get_pixel(15, 6).0, [255, 0, 0]);
}

#[test]
fn short_stream_is_one_terminal_task() {
    let (mut pipeline, sink) = build(finite_source(3), small_window(), five_member_models(0.5));

    pipeline.start().unwrap();
    pipeline.run().unwrap();
    let summary = pipeline.join().unwrap();

    assert_eq!(sink.seqs().unwrap(), vec![0, 1, 2]);
    assert_eq!(summary.tasks_read, 1);
    assert_eq!(summary.tasks_processed, 0);
}

/// Counts `release` calls on the wrapped source.
struct CountingSource {
    inner: Box<dyn FrameSource>,
    releases: Arc<AtomicUsize>,
}

impl FrameSource for CountingSource {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        self.inner.read()
    }

    fn release(&mut self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.inner.release()
    }

    fn frame_size(&self) -> (u32, u32) {
        self.inner.frame_size()
    }
}

#[test]
fn cleanup_is_idempotent() {
    let releases = Arc::new(AtomicUsize::new(0));
    let source = CountingSource {
        inner: clipwatch::open_source(&finite_source(10)).unwrap(),
        releases: releases.clone(),
    };
    let sink = MemorySink::new();
    let mut pipeline = Pipeline::new(
        Box::new(source),
        small_window(),
        five_member_models(0.5),
        None,
        Some(Box::new(sink.clone()) as Box<dyn FrameSink>),
    )
    .unwrap();
    pipeline.start().unwrap();
    pipeline.run().unwrap();
    pipeline.join().unwrap();

    pipeline.cleanup().unwrap();
    pipeline.cleanup().unwrap();
    pipeline.shutdown_handle().cleanup().unwrap();
    drop(pipeline);

    assert_eq!(sink.release_count().unwrap(), 1);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
}

/// Counts how often the ensemble invokes it.
struct CountingPredictor {
    calls: Arc<AtomicUsize>,
}

impl ActionPredictor for CountingPredictor {
    fn name(&self) -> &str {
        "counting"
    }

    fn predict(&mut self, task: &Task) -> Result<BoxPredictions> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![vec![Prediction::new("drowning", 0.99)]; task.detection_boxes().len()])
    }
}

#[test]
fn tasks_without_people_skip_the_predictors() {
    let calls = Arc::new(AtomicUsize::new(0));
    let ensemble = Ensemble::new(vec![Box::new(CountingPredictor {
        calls: calls.clone(),
    })])
    .unwrap();
    let models = Models {
        detector: Box::new(StubDetector::empty()),
        voter: EnsembleVoter::new(VotePolicy::default(), 1).unwrap(),
        ensemble,
        annotator: Box::new(BoxAnnotator::default()),
    };
    let (mut pipeline, sink) = build(finite_source(10), small_window(), models);

    pipeline.start().unwrap();
    pipeline.run().unwrap();
    let summary = pipeline.join().unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(summary.tasks_processed, 4);
    assert!(!summary.alert_fired);
    assert_eq!(sink.seqs().unwrap(), (0..10).collect::<Vec<u64>>());
}

#[test]
fn shutdown_handle_stops_an_unbounded_source() {
    let unbounded = SourceConfig {
        live: Some(false),
        max_frames: None,
        ..finite_source(0)
    };
    let mut settings = small_window();
    settings.pace_reads = true;
    settings.output_fps = 100.0;
    let (mut pipeline, sink) = build(unbounded, settings, five_member_models(0.5));
    let handle = pipeline.shutdown_handle();

    pipeline.start().unwrap();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(200));
        handle.cleanup()
    });
    pipeline.run().unwrap();
    pipeline.join().unwrap();
    stopper.join().unwrap().unwrap();

    assert_eq!(pipeline.state().unwrap(), PipelineState::Stopped);
    assert_eq!(sink.release_count().unwrap(), 1);
    // Whatever made it out is a gapless prefix of the stream.
    let seqs = sink.seqs().unwrap();
    assert_eq!(seqs, (0..seqs.len() as u64).collect::<Vec<_>>());
    assert!(pipeline.start().is_err());
}

struct FailingPredictor;

impl ActionPredictor for FailingPredictor {
    fn name(&self) -> &str {
        "failing"
    }

    fn predict(&mut self, _task: &Task) -> Result<BoxPredictions> {
        Err(anyhow!("model crashed"))
    }
}

#[test]
fn predictor_error_stops_the_pipeline() {
    let ensemble = Ensemble::new(vec![Box::new(FailingPredictor)]).unwrap();
    let models = Models {
        detector: Box::new(StubDetector::centered()),
        voter: EnsembleVoter::new(VotePolicy::default(), 1).unwrap(),
        ensemble,
        annotator: Box::new(BoxAnnotator::default()),
    };
    let (mut pipeline, sink) = build(finite_source(10), small_window(), models);

    pipeline.start().unwrap();
    let err = pipeline.run().unwrap_err();
    assert!(format!("{:#}", err).contains("model crashed"));
    pipeline.join().unwrap();
    pipeline.cleanup().unwrap();
    assert!(sink.seqs().unwrap().is_empty());
    assert_eq!(sink.release_count().unwrap(), 1);
}

#[test]
fn construction_rejects_bad_settings() {
    let source = || clipwatch::open_source(&finite_source(10)).unwrap();
    let sink = || Some(Box::new(MemorySink::new()) as Box<dyn FrameSink>);

    let no_sink = Pipeline::new(source(), small_window(), five_member_models(0.5), None, None);
    assert!(no_sink.is_err());

    let mut odd = small_window();
    odd.clip.clip_len = 3;
    assert!(Pipeline::new(source(), odd, five_member_models(0.5), None, sink()).is_err());

    let mut wide_vis = small_window();
    wide_vis.clip.vis_length = 3;
    assert!(Pipeline::new(source(), wide_vis, five_member_models(0.5), None, sink()).is_err());

    let mut big_step = small_window();
    big_step.clip.step = 6;
    assert!(Pipeline::new(source(), big_step, five_member_models(0.5), None, sink()).is_err());
}
