//! clipwatch - run the sliding-window action detection pipeline on a stream

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;

use clipwatch::detect::{build_detector, build_predictor};
use clipwatch::output::FrameSink;
use clipwatch::{
    open_source, BoxAnnotator, ClipGeometry, Ensemble, EnsembleVoter, ImageSequenceWriter, Models,
    Pipeline, PipelineConfig, PreviewSink,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON or TOML config file.
    #[arg(long, env = "CLIPWATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Input: stub://<name>, an image directory, or a video path/URL.
    #[arg(long)]
    input: Option<String>,
    /// Directory for annotated output frames.
    #[arg(long)]
    out_dir: Option<PathBuf>,
    /// Enable the preview sink.
    #[arg(long)]
    preview: bool,
    /// Read finite sources as fast as possible.
    #[arg(long)]
    no_pace: bool,
    /// UI mode for stderr progress.
    #[arg(long, value_enum, default_value_t = ui::UiMode::Auto)]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::Ui::new(args.ui, std::io::stderr().is_terminal());

    let mut cfg = PipelineConfig::load_from(args.config.as_deref())?;
    if let Some(input) = args.input {
        cfg.source.uri = input;
    }
    if let Some(dir) = args.out_dir {
        cfg.output.dir = Some(dir);
    }
    if args.preview {
        cfg.output.preview = true;
    }
    if args.no_pace {
        cfg.pace_reads = false;
    }
    cfg.validate()?;

    let source = ui.run_stage("Open source", || open_source(&cfg.source))?;
    let (width, height) = source.frame_size();
    log::info!("source {} opened ({}x{})", cfg.source.uri, width, height);
    let geometry = ClipGeometry::new(&cfg.clip, source.frame_size())?;
    let output_fps = clipwatch::pipeline::resolve_output_fps(cfg.output.fps, source.native_fps());

    let models = ui.run_stage("Load models", || {
        let labels = cfg.ensemble.load_label_map()?;
        let detector = build_detector(&cfg.detector)?;
        let members = cfg
            .ensemble
            .members
            .iter()
            .map(|member| build_predictor(member, labels.as_ref(), &geometry))
            .collect::<Result<Vec<_>>>()?;
        let ensemble = Ensemble::new(members)?;
        let voter = EnsembleVoter::new(cfg.vote.clone(), ensemble.len())?;
        Ok(Models {
            detector,
            ensemble,
            voter,
            annotator: Box::new(BoxAnnotator::default()),
        })
    })?;

    let viewer: Option<Box<dyn FrameSink>> = cfg
        .output
        .preview
        .then(|| Box::new(PreviewSink::new(output_fps)) as Box<dyn FrameSink>);
    let writer: Option<Box<dyn FrameSink>> = match &cfg.output.dir {
        Some(dir) => Some(Box::new(ImageSequenceWriter::create(dir, &cfg.output.format)?)),
        None => None,
    };

    let settings = cfg.pipeline_settings();
    let mut pipeline = ui.run_stage("Warm up pipeline", || {
        Pipeline::new(source, settings, models, viewer, writer)
    })?;

    let handle = pipeline.shutdown_handle();
    ctrlc::set_handler(move || {
        log::warn!("interrupt received, shutting down");
        if let Err(err) = handle.cleanup() {
            log::error!("cleanup after interrupt failed: {:#}", err);
        }
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    pipeline.start()?;
    let run_result = pipeline.run();
    let join_result = pipeline.join();
    let cleanup_result = pipeline.cleanup();

    run_result?;
    let summary = join_result?;
    cleanup_result?;
    ui.summary(&summary);
    Ok(())
}
