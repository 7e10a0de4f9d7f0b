//! Concurrent sliding-window pipeline.
//!
//! Three execution contexts share one [`Shared`] block:
//! - the read thread fills windows from the source and enqueues tasks;
//! - the controlling thread (inside [`Pipeline::run`]) runs detection,
//!   prediction, voting and annotation;
//! - the display thread emits frames in task-id order to the viewer/writer.
//!
//! Shutdown is a single flag checked at every loop head. [`Pipeline::cleanup`]
//! (also reachable through a [`ShutdownHandle`] and on drop) releases the
//! source and sinks exactly once.

mod display;
mod process;
mod read;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};

use crate::detect::{Ensemble, HumanDetector};
use crate::geometry::{ClipGeometry, ClipSettings};
use crate::ingest::FrameSource;
use crate::output::FrameSink;
use crate::render::Annotator;
use crate::vote::EnsembleVoter;

pub use display::ReorderBuffer;
pub use process::AlertTrigger;

use display::DisplayStage;
use process::ProcessStage;
use read::ReadStage;

pub const FALLBACK_OUTPUT_FPS: f32 = 25.0;
pub const DEFAULT_ALERT_REPEAT: usize = 9;

/// Output rate: the configured value, else the source's native rate, else 25.
pub fn resolve_output_fps(configured: f32, native: Option<f32>) -> f32 {
    if configured > 0.0 {
        return configured;
    }
    native
        .filter(|fps| fps.is_finite() && *fps > 0.0)
        .unwrap_or(FALLBACK_OUTPUT_FPS)
}

// ----------------------------------------------------------------------------
// Settings
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct AlertSettings {
    /// Consecutive alerting tasks needed to raise the alert.
    pub repeat_count: usize,
    /// Where to save the one-time snapshot. `None` only logs.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            repeat_count: DEFAULT_ALERT_REPEAT,
            snapshot_path: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    pub clip: ClipSettings,
    /// 0 uses the source's native rate.
    pub output_fps: f32,
    /// Sleep `1 / output_fps` after each read from a finite source.
    pub pace_reads: bool,
    pub alert: AlertSettings,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            clip: ClipSettings::default(),
            output_fps: 0.0,
            pace_reads: true,
            alert: AlertSettings::default(),
        }
    }
}

/// Inference collaborators driven by the process stage.
pub struct Models {
    pub detector: Box<dyn HumanDetector>,
    pub ensemble: Ensemble,
    pub voter: EnsembleVoter,
    pub annotator: Box<dyn Annotator>,
}

// ----------------------------------------------------------------------------
// Shared state
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineState {
    Created,
    Started,
    Running,
    Stopping,
    Stopped,
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ReadProgress {
    /// Tasks enqueued so far, terminal task included.
    pub(crate) produced: u64,
    pub(crate) exhausted: bool,
}

#[derive(Default)]
pub(crate) struct Outputs {
    pub(crate) viewer: Option<Box<dyn FrameSink>>,
    pub(crate) writer: Option<Box<dyn FrameSink>>,
}

pub(crate) struct Shared {
    stopped: AtomicBool,
    state: Mutex<PipelineState>,
    progress: Mutex<ReadProgress>,
    reorder: Mutex<ReorderBuffer>,
    source: Mutex<Option<Box<dyn FrameSource>>>,
    outputs: Mutex<Outputs>,
    pub(crate) emitted: AtomicU64,
}

impl Shared {
    fn new(source: Box<dyn FrameSource>, outputs: Outputs) -> Self {
        Self {
            stopped: AtomicBool::new(false),
            state: Mutex::new(PipelineState::Created),
            progress: Mutex::new(ReadProgress::default()),
            reorder: Mutex::new(ReorderBuffer::new()),
            source: Mutex::new(Some(source)),
            outputs: Mutex::new(outputs),
            emitted: AtomicU64::new(0),
        }
    }

    pub(crate) fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn state(&self) -> Result<MutexGuard<'_, PipelineState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("pipeline state lock poisoned"))
    }

    pub(crate) fn progress(&self) -> Result<ReadProgress> {
        let progress = self
            .progress
            .lock()
            .map_err(|_| anyhow!("read progress lock poisoned"))?;
        Ok(*progress)
    }

    pub(crate) fn publish_progress(&self, produced: u64, exhausted: bool) -> Result<()> {
        let mut progress = self
            .progress
            .lock()
            .map_err(|_| anyhow!("read progress lock poisoned"))?;
        progress.produced = produced;
        progress.exhausted = exhausted;
        Ok(())
    }

    pub(crate) fn reorder(&self) -> Result<MutexGuard<'_, ReorderBuffer>> {
        self.reorder
            .lock()
            .map_err(|_| anyhow!("reorder buffer lock poisoned"))
    }

    pub(crate) fn source(&self) -> Result<MutexGuard<'_, Option<Box<dyn FrameSource>>>> {
        self.source
            .lock()
            .map_err(|_| anyhow!("source lock poisoned"))
    }

    pub(crate) fn outputs(&self) -> Result<MutexGuard<'_, Outputs>> {
        self.outputs
            .lock()
            .map_err(|_| anyhow!("output lock poisoned"))
    }

    /// Stop every stage and release the source and sinks. Safe to call any
    /// number of times from any thread; only the first call releases.
    fn cleanup(&self) -> Result<()> {
        self.request_stop();
        let mut state = self.state()?;
        if *state == PipelineState::Stopped {
            return Ok(());
        }
        *state = PipelineState::Stopping;

        let mut first_error: Option<anyhow::Error> = None;
        if let Some(mut source) = self.source()?.take() {
            if let Err(err) = source.release() {
                log::warn!("failed to release source: {:#}", err);
                first_error.get_or_insert(err);
            }
        }
        let (viewer, writer) = {
            let mut outputs = self.outputs()?;
            (outputs.viewer.take(), outputs.writer.take())
        };
        for mut sink in viewer.into_iter().chain(writer) {
            if let Err(err) = sink.release() {
                log::warn!("failed to release {} sink: {:#}", sink.name(), err);
                first_error.get_or_insert(err);
            }
        }

        *state = PipelineState::Stopped;
        log::info!("pipeline stopped");
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Cloneable handle that can stop and clean up the pipeline from any thread,
/// including a signal handler.
#[derive(Clone)]
pub struct ShutdownHandle {
    shared: Arc<Shared>,
}

impl ShutdownHandle {
    /// Ask every stage to exit at its next loop head.
    pub fn request_stop(&self) {
        self.shared.request_stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    pub fn cleanup(&self) -> Result<()> {
        self.shared.cleanup()
    }
}

// ----------------------------------------------------------------------------
// Pipeline
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub tasks_read: u64,
    pub tasks_processed: u64,
    pub frames_emitted: u64,
    pub alert_fired: bool,
}

pub struct Pipeline {
    shared: Arc<Shared>,
    geometry: ClipGeometry,
    output_fps: f32,
    read: Option<ReadStage>,
    process: ProcessStage,
    display: Option<DisplayStage>,
    read_handle: Option<JoinHandle<Result<()>>>,
    display_handle: Option<JoinHandle<Result<()>>>,
}

impl Pipeline {
    /// Validate the settings against the source and wire up the stages.
    ///
    /// Nothing runs until [`start`](Self::start). At least one of `viewer`
    /// and `writer` must be present.
    pub fn new(
        source: Box<dyn FrameSource>,
        settings: PipelineSettings,
        mut models: Models,
        viewer: Option<Box<dyn FrameSink>>,
        writer: Option<Box<dyn FrameSink>>,
    ) -> Result<Self> {
        if viewer.is_none() && writer.is_none() {
            bail!("pipeline needs a viewer or a writer");
        }
        if models.voter.members() != models.ensemble.len() {
            bail!(
                "voter expects {} members but the ensemble has {}",
                models.voter.members(),
                models.ensemble.len()
            );
        }
        if settings.alert.repeat_count == 0 {
            bail!("alert repeat_count must be > 0");
        }
        let geometry = ClipGeometry::new(&settings.clip, source.frame_size())?;

        let output_fps = resolve_output_fps(settings.output_fps, source.native_fps());
        let pace = (settings.pace_reads && !source.is_live())
            .then(|| Duration::from_secs_f32(1.0 / output_fps));

        models
            .detector
            .warm_up()
            .with_context(|| format!("warm-up failed for detector '{}'", models.detector.name()))?;
        models.ensemble.warm_up()?;

        log::info!(
            "pipeline: window={} step={} clip_len={} interval={} display={:?} model={:?} fps={:.1}{}",
            geometry.window(),
            geometry.step(),
            geometry.clip_len(),
            geometry.frame_interval(),
            geometry.display_size(),
            geometry.model_size(),
            output_fps,
            if pace.is_some() { " (paced)" } else { "" }
        );
        log::info!("ensemble members: {}", models.ensemble.names().join(", "));

        let shared = Arc::new(Shared::new(source, Outputs { viewer, writer }));
        let (tx, rx) = crossbeam_channel::unbounded();
        let read = ReadStage::new(shared.clone(), tx, geometry.clone(), pace);
        let process = ProcessStage::new(
            shared.clone(),
            rx,
            models.detector,
            models.ensemble,
            models.voter,
            models.annotator,
            &settings.alert,
            geometry.display_indices().start,
        );
        let display = DisplayStage::new(shared.clone(), geometry.clone());

        Ok(Self {
            shared,
            geometry,
            output_fps,
            read: Some(read),
            process,
            display: Some(display),
            read_handle: None,
            display_handle: None,
        })
    }

    pub fn geometry(&self) -> &ClipGeometry {
        &self.geometry
    }

    pub fn output_fps(&self) -> f32 {
        self.output_fps
    }

    pub fn state(&self) -> Result<PipelineState> {
        Ok(*self.shared.state()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            shared: self.shared.clone(),
        }
    }

    /// Spawn the read and display threads.
    pub fn start(&mut self) -> Result<()> {
        let mut state = self.shared.state()?;
        if *state != PipelineState::Created {
            bail!("pipeline cannot start from state {:?}", *state);
        }
        let (Some(read), Some(display)) = (self.read.take(), self.display.take()) else {
            bail!("pipeline stages already consumed");
        };

        self.read_handle = Some(
            std::thread::Builder::new()
                .name("clipwatch-read".to_string())
                .spawn(move || read.run())
                .context("failed to spawn read thread")?,
        );
        self.display_handle = Some(
            std::thread::Builder::new()
                .name("clipwatch-display".to_string())
                .spawn(move || display.run())
                .context("failed to spawn display thread")?,
        );
        *state = PipelineState::Started;
        Ok(())
    }

    /// Run the process loop on the calling thread until the stream ends or
    /// shutdown is requested. An error stops the other stages too.
    pub fn run(&mut self) -> Result<()> {
        {
            let mut state = self.shared.state()?;
            if *state != PipelineState::Started {
                bail!("pipeline cannot run from state {:?}", *state);
            }
            *state = PipelineState::Running;
        }
        self.process.run()
    }

    /// Wait for the read and display threads. Returns the first stage error.
    pub fn join(&mut self) -> Result<RunSummary> {
        let mut first_error: Option<anyhow::Error> = None;
        let handles = [
            ("read", self.read_handle.take()),
            ("display", self.display_handle.take()),
        ];
        for (name, handle) in handles {
            let Some(handle) = handle else { continue };
            let result = handle
                .join()
                .map_err(|_| anyhow!("{} thread panicked", name))
                .and_then(|r| r.with_context(|| format!("{} stage failed", name)));
            if let Err(err) = result {
                self.shared.request_stop();
                first_error.get_or_insert(err);
            }
        }

        {
            let mut state = self.shared.state()?;
            if matches!(*state, PipelineState::Started | PipelineState::Running) {
                *state = PipelineState::Stopping;
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        let summary = self.summary()?;
        log::info!(
            "run complete: {} tasks read, {} processed, {} frames emitted, alert {}",
            summary.tasks_read,
            summary.tasks_processed,
            summary.frames_emitted,
            if summary.alert_fired { "fired" } else { "not fired" }
        );
        Ok(summary)
    }

    pub fn summary(&self) -> Result<RunSummary> {
        Ok(RunSummary {
            tasks_read: self.shared.progress()?.produced,
            tasks_processed: self.process.tasks_processed(),
            frames_emitted: self.shared.emitted.load(Ordering::SeqCst),
            alert_fired: self.process.alert_fired(),
        })
    }

    /// Stop all stages and release the source and sinks. Idempotent.
    pub fn cleanup(&self) -> Result<()> {
        self.shared.cleanup()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if let Err(err) = self.shared.cleanup() {
            log::warn!("pipeline cleanup on drop failed: {:#}", err);
        }
    }
}
