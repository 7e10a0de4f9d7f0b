//! Startup stage reporting for the `clipwatch` binary.
//!
//! On a terminal each stage gets an `indicatif` spinner; otherwise stages are
//! printed as plain lines on stderr so logs stay readable.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use clipwatch::RunSummary;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        let pretty = match mode {
            UiMode::Auto | UiMode::Pretty => is_tty,
            UiMode::Plain => false,
        };
        Self { pretty }
    }

    /// Run `work` as a named stage, marking it failed if it returns an error.
    pub fn run_stage<T>(
        &self,
        name: &str,
        work: impl FnOnce() -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let mut stage = self.stage(name);
        let result = work();
        stage.settle(&result);
        result
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if !self.pretty {
            eprintln!("==> {}", name);
            return StageGuard::new(name, None);
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(format!("{name}…"));
        StageGuard::new(name, Some(spinner))
    }

    pub fn summary(&self, summary: &RunSummary) {
        eprintln!(
            "tasks: {} read / {} processed, frames written: {}, alert: {}",
            summary.tasks_read,
            summary.tasks_processed,
            summary.frames_emitted,
            if summary.alert_fired { "FIRED" } else { "none" }
        );
    }
}

/// Marks a stage finished when dropped. Call [`StageGuard::settle`] first
/// with the stage's result so a failure shows as failed.
pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl StageGuard {
    fn new(name: &str, spinner: Option<ProgressBar>) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }

    pub fn settle<T>(&mut self, result: &anyhow::Result<T>) {
        self.failed = result.is_err();
    }

    fn message(&self) -> String {
        let mark = if self.failed { "✘" } else { "✔" };
        format!(
            "{} {} ({})",
            mark,
            self.name,
            format_duration(self.start.elapsed())
        )
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = self.message();
        match &self.spinner {
            Some(spinner) if self.failed => spinner.abandon_with_message(message),
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
