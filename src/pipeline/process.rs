//! Process stage: detection, ensemble prediction, voting and annotation.
//!
//! Runs on the controlling thread. Tasks leave in completion order; the
//! reorder buffer restores id order for display.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, TryRecvError};

use crate::detect::{Ensemble, HumanDetector};
use crate::output::write_snapshot;
use crate::render::{label_text, Annotator};
use crate::task::Task;
use crate::vote::EnsembleVoter;

use super::read::QueueEntry;
use super::{AlertSettings, Shared};

const QUEUE_POLL: Duration = Duration::from_millis(10);

/// Fires once when `repeat_count` consecutive tasks carry an alert.
#[derive(Clone, Debug)]
pub struct AlertTrigger {
    repeat_count: usize,
    streak: usize,
    fired: bool,
}

impl AlertTrigger {
    pub fn new(repeat_count: usize) -> Self {
        Self {
            repeat_count: repeat_count.max(1),
            streak: 0,
            fired: false,
        }
    }

    /// Record one task. Returns true on the task that completes the streak,
    /// and never again until `reset`.
    pub fn observe(&mut self, alerting: bool) -> bool {
        if !alerting {
            self.streak = 0;
            return false;
        }
        self.streak += 1;
        if !self.fired && self.streak == self.repeat_count {
            self.fired = true;
            return true;
        }
        false
    }

    pub fn streak(&self) -> usize {
        self.streak
    }

    pub fn has_fired(&self) -> bool {
        self.fired
    }

    pub fn reset(&mut self) {
        self.streak = 0;
        self.fired = false;
    }
}

pub(crate) struct ProcessStage {
    shared: Arc<Shared>,
    queue: Receiver<QueueEntry>,
    detector: Box<dyn HumanDetector>,
    ensemble: Ensemble,
    voter: EnsembleVoter,
    annotator: Box<dyn Annotator>,
    alert: AlertTrigger,
    snapshot_path: Option<PathBuf>,
    snapshot_index: usize,
    processed: u64,
}

impl ProcessStage {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        shared: Arc<Shared>,
        queue: Receiver<QueueEntry>,
        detector: Box<dyn HumanDetector>,
        ensemble: Ensemble,
        voter: EnsembleVoter,
        annotator: Box<dyn Annotator>,
        alert: &AlertSettings,
        snapshot_index: usize,
    ) -> Self {
        Self {
            shared,
            queue,
            detector,
            ensemble,
            voter,
            annotator,
            alert: AlertTrigger::new(alert.repeat_count),
            snapshot_path: alert.snapshot_path.clone(),
            snapshot_index,
            processed: 0,
        }
    }

    pub(crate) fn tasks_processed(&self) -> u64 {
        self.processed
    }

    pub(crate) fn alert_fired(&self) -> bool {
        self.alert.has_fired()
    }

    pub(crate) fn run(&mut self) -> Result<()> {
        let result = self.process_loop();
        if result.is_err() {
            self.shared.request_stop();
        }
        result
    }

    fn process_loop(&mut self) -> Result<()> {
        loop {
            if self.shared.is_stopped() {
                return Ok(());
            }
            match self.queue.try_recv() {
                Ok(entry) => {
                    if entry.exhausted {
                        self.shared.reorder()?.insert(entry.task)?;
                        return Ok(());
                    }
                    let task = self.process(entry.task)?;
                    self.shared.reorder()?.insert(task)?;
                }
                Err(TryRecvError::Empty) => std::thread::sleep(QUEUE_POLL),
                Err(TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    fn process(&mut self, mut task: Task) -> Result<Task> {
        let started = Instant::now();

        self.detector
            .predict(&mut task)
            .with_context(|| format!("human detector failed on task {}", task.id()))?;

        if task.detection_boxes().is_empty() {
            task.set_predictions(Vec::new())?;
        } else {
            let outputs = self.ensemble.predict_all(&task)?;
            let voted = self.voter.vote(&outputs, task.detection_boxes().len())?;
            task.set_predictions(voted)?;
            task.retain_predicted_boxes();
        }
        log::debug!(
            "task {} inference took {} ms",
            task.id(),
            started.elapsed().as_millis()
        );

        let range = task.draw_range();
        let (frames, boxes, predictions) = task.annotation_parts();
        for frame in &mut frames[range] {
            self.annotator.annotate(frame, boxes, predictions);
        }

        self.log_results(&task);
        if self.alert.observe(task.has_predictions()) {
            self.on_alert(&task);
        }
        self.processed += 1;
        Ok(task)
    }

    fn log_results(&self, task: &Task) {
        if !task.has_predictions() {
            log::debug!("task {}: no alerts", task.id());
            return;
        }
        for (bbox, preds) in task.display_boxes().iter().zip(task.predictions()) {
            let labels: Vec<String> = preds.iter().map(label_text).collect();
            log::info!(
                "task {}: person at ({:.0}, {:.0}, {:.0}, {:.0}) -> {}",
                task.id(),
                bbox.x1,
                bbox.y1,
                bbox.x2,
                bbox.y2,
                labels.join(", ")
            );
        }
    }

    fn on_alert(&self, task: &Task) {
        log::warn!(
            "alert raised on task {} after {} consecutive alerting tasks",
            task.id(),
            self.alert.streak()
        );
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let frames = task.frames();
        let Some(frame) = frames.get(self.snapshot_index.min(frames.len().saturating_sub(1))) else {
            log::warn!("task {} has no frames to snapshot", task.id());
            return;
        };
        match write_snapshot(path, frame) {
            Ok(()) => log::info!("alert snapshot written to {}", path.display()),
            Err(err) => log::error!("failed to write alert snapshot: {:#}", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_on_the_nth_consecutive_alert() {
        let mut trigger = AlertTrigger::new(3);
        assert!(!trigger.observe(true));
        assert!(!trigger.observe(true));
        assert!(trigger.observe(true));
        assert!(!trigger.observe(true));
        assert!(trigger.has_fired());
    }

    #[test]
    fn quiet_task_resets_the_streak() {
        let mut trigger = AlertTrigger::new(2);
        assert!(!trigger.observe(true));
        assert!(!trigger.observe(false));
        assert!(!trigger.observe(true));
        assert!(trigger.observe(true));
    }

    #[test]
    fn does_not_refire_until_reset() {
        let mut trigger = AlertTrigger::new(1);
        assert!(trigger.observe(true));
        assert!(!trigger.observe(false));
        assert!(!trigger.observe(true));
        trigger.reset();
        assert!(trigger.observe(true));
    }
}
