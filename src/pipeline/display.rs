//! Display stage: drains the reorder buffer strictly in task-id order.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

use crate::geometry::ClipGeometry;
use crate::task::Task;

use super::Shared;

const DISPLAY_POLL: Duration = Duration::from_millis(20);

/// Tasks finished by the process stage but not yet displayed, keyed by id.
///
/// The buffer owns the next id to display, so every id is removed exactly
/// once and in increasing order.
#[derive(Debug, Default)]
pub struct ReorderBuffer {
    pending: BTreeMap<u64, (bool, Task)>,
    next_id: u64,
}

impl ReorderBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn insert(&mut self, task: Task) -> Result<()> {
        let id = task.id();
        if id < self.next_id {
            return Err(anyhow!("task {} was already displayed", id));
        }
        if self.pending.contains_key(&id) {
            return Err(anyhow!("task {} is already pending display", id));
        }
        self.pending.insert(id, (task.is_end_of_stream(), task));
        Ok(())
    }

    /// Remove the entry for the next id, if it has arrived.
    pub fn pop_next(&mut self) -> Option<(bool, Task)> {
        let entry = self.pending.remove(&self.next_id)?;
        self.next_id += 1;
        Some(entry)
    }
}

pub(crate) struct DisplayStage {
    shared: Arc<Shared>,
    geometry: ClipGeometry,
}

impl DisplayStage {
    pub(crate) fn new(shared: Arc<Shared>, geometry: ClipGeometry) -> Self {
        Self { shared, geometry }
    }

    pub(crate) fn run(self) -> Result<()> {
        let result = self.display_loop();
        if result.is_err() {
            self.shared.request_stop();
        }
        result
    }

    fn display_loop(&self) -> Result<()> {
        let mut last = Instant::now();
        loop {
            if self.shared.is_stopped() {
                return Ok(());
            }

            let progress = self.shared.progress()?;
            let next = {
                let mut reorder = self.shared.reorder()?;
                if progress.exhausted && reorder.next_id() == progress.produced {
                    log::debug!("display stage finished after {} tasks", progress.produced);
                    return Ok(());
                }
                reorder.pop_next()
            };

            let Some((end_of_stream, task)) = next else {
                std::thread::sleep(DISPLAY_POLL);
                continue;
            };

            self.emit(&task, end_of_stream)?;
            log::debug!(
                "displayed task {} ({} produced) in {} ms",
                task.id(),
                progress.produced,
                last.elapsed().as_millis()
            );
            last = Instant::now();
        }
    }

    fn emit(&self, task: &Task, end_of_stream: bool) -> Result<()> {
        let range = self
            .geometry
            .emit_range(task.id(), end_of_stream, task.frames().len());
        let mut outputs = self.shared.outputs()?;
        let mut emitted = 0;
        for frame in &task.frames()[range] {
            if let Some(viewer) = outputs.viewer.as_mut() {
                viewer.write(frame)?;
            }
            if let Some(writer) = outputs.writer.as_mut() {
                writer.write(frame)?;
            }
            emitted += 1;
        }
        self.shared.emitted.fetch_add(emitted, Ordering::SeqCst);
        Ok(())
    }
}
