//! Read stage: fills sliding windows from the source and enqueues tasks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use crossbeam_channel::Sender;

use crate::frame::{Frame, Preprocessor, ProcessedFrame};
use crate::geometry::ClipGeometry;
use crate::task::Task;

use super::Shared;

/// One FIFO entry. `exhausted` marks the terminal, possibly partial, task.
pub(crate) struct QueueEntry {
    pub(crate) exhausted: bool,
    pub(crate) task: Task,
}

/// Outcome of filling one window.
enum Window {
    Full,
    Exhausted,
    Cancelled,
}

pub(crate) struct ReadStage {
    shared: Arc<Shared>,
    queue: Sender<QueueEntry>,
    preprocessor: Preprocessor,
    geometry: ClipGeometry,
    pace: Option<Duration>,
    carry_frames: Vec<Frame>,
    carry_processed: Vec<ProcessedFrame>,
    next_id: u64,
    next_seq: u64,
}

impl ReadStage {
    pub(crate) fn new(
        shared: Arc<Shared>,
        queue: Sender<QueueEntry>,
        geometry: ClipGeometry,
        pace: Option<Duration>,
    ) -> Self {
        let preprocessor = Preprocessor::new(
            geometry.display_size(),
            geometry.model_size(),
            geometry.normalization().clone(),
        );
        Self {
            shared,
            queue,
            preprocessor,
            geometry,
            pace,
            carry_frames: Vec::new(),
            carry_processed: Vec::new(),
            next_id: 0,
            next_seq: 0,
        }
    }

    pub(crate) fn run(mut self) -> Result<()> {
        let result = self.read_loop();
        if result.is_err() {
            self.shared.request_stop();
        }
        result
    }

    fn read_loop(&mut self) -> Result<()> {
        loop {
            if self.shared.is_stopped() {
                return Ok(());
            }

            let started = Instant::now();
            let mut frames = self.carry_frames.clone();
            let mut processed = self.carry_processed.clone();
            let carried = frames.len();

            let outcome = self.fill_window(&mut frames, &mut processed)?;
            let exhausted = match outcome {
                Window::Cancelled => return Ok(()),
                Window::Full => false,
                Window::Exhausted => true,
            };

            let fresh = frames.len() - carried;
            let elapsed = started.elapsed();
            log::debug!(
                "read task {}: {} new frames in {} ms ({:.1} fps)",
                self.next_id,
                fresh,
                elapsed.as_millis(),
                fresh as f64 / elapsed.as_secs_f64().max(1e-6)
            );

            if !exhausted {
                let overlap = self.geometry.overlap();
                self.carry_frames = frames[frames.len() - overlap..].to_vec();
                self.carry_processed = processed[processed.len() - overlap..].to_vec();
            }

            let mut task = Task::new(
                self.next_id,
                frames,
                processed,
                self.geometry.sample_indices(),
                self.geometry.ratio(),
                self.geometry.vis_length(),
            );
            if exhausted {
                task.mark_end_of_stream();
            }
            self.next_id += 1;

            if self.queue.send(QueueEntry { exhausted, task }).is_err() {
                if self.shared.is_stopped() {
                    return Ok(());
                }
                return Err(anyhow!("task queue closed before the stream ended"));
            }
            self.shared.publish_progress(self.next_id, exhausted)?;

            if exhausted {
                log::info!("source exhausted after {} frames", self.next_seq);
                return Ok(());
            }
        }
    }

    /// Read until the window is full, the source runs out, or shutdown is
    /// requested. The source lock is held for the whole window.
    fn fill_window(
        &mut self,
        frames: &mut Vec<Frame>,
        processed: &mut Vec<ProcessedFrame>,
    ) -> Result<Window> {
        let window = self.geometry.window();
        let mut guard = self.shared.source()?;
        let Some(source) = guard.as_mut() else {
            return Ok(Window::Exhausted);
        };

        while frames.len() < window {
            if self.shared.is_stopped() {
                return Ok(Window::Cancelled);
            }
            let raw = match source.read() {
                Ok(Some(raw)) => raw,
                Ok(None) => return Ok(Window::Exhausted),
                Err(err) => {
                    log::warn!("source read failed, treating as end of stream: {:#}", err);
                    return Ok(Window::Exhausted);
                }
            };
            let (frame, model_frame) = self.preprocessor.prepare(self.next_seq, raw);
            self.next_seq += 1;
            frames.push(frame);
            processed.push(model_frame);

            if let Some(pace) = self.pace {
                std::thread::sleep(pace);
            }
        }
        Ok(Window::Full)
    }
}
