use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use swapface_core::{ExecutionProvider, FaceAnalyser, FaceEnhancer, InSwapper};
use swapface_media::{
    assemble_video, extract_frames, list_frames, probe_fps, restore_audio, swapped_path, VideoError,
};
use tracing_subscriber::EnvFilter;

mod config;
mod pipeline;

use config::Config;
use pipeline::{ImageOutcome, Pipeline, VideoReport};

type ModelPipeline = Pipeline<FaceAnalyser, InSwapper, FaceEnhancer>;

/// Exit status for runs that were rejected rather than failed.
const EXIT_REJECTED: u8 = 1;

#[derive(Parser)]
#[command(name = "swapface", version, about = "Swap faces in images and videos")]
struct Cli {
    /// TOML config file (defaults and SWAPFACE_* env vars apply otherwise)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Execution provider: cpu or cuda
    #[arg(long, global = true)]
    provider: Option<ExecutionProvider>,
    /// Skip GFPGAN restoration of swapped faces
    #[arg(long, global = true)]
    no_enhance: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Swap every face of the source image into the target image
    Image {
        #[arg(short, long)]
        source: PathBuf,
        #[arg(short, long)]
        target: PathBuf,
        /// Output path (default: swapped-<target name> next to the target)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Swap the source face into every frame of a video
    Video {
        #[arg(short, long)]
        source: PathBuf,
        #[arg(short, long)]
        target: PathBuf,
        /// Only replace faces matching the face in this image
        #[arg(short, long)]
        reference: Option<PathBuf>,
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Keep the source frame rate instead of resampling to default_fps
        #[arg(long)]
        keep_fps: bool,
        /// Keep the extracted frame directory
        #[arg(long)]
        keep_frames: bool,
        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Swap the source face into a directory of frames, in place
    Frames {
        #[arg(short, long)]
        source: PathBuf,
        #[arg(short, long)]
        dir: PathBuf,
        #[arg(short, long)]
        reference: Option<PathBuf>,
        #[arg(long)]
        report: Option<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(provider) = cli.provider {
        config.provider = provider;
    }
    if cli.no_enhance {
        config.enhance = false;
    }
    tracing::debug!(?config, "configuration loaded");

    let mut pipeline = build_pipeline(&config)?;

    match cli.command {
        Commands::Image { source, target, output } => {
            match pipeline.process_image(&source, &target, output.as_deref())? {
                ImageOutcome::Swapped(path) => {
                    println!("{}", path.display());
                    Ok(ExitCode::SUCCESS)
                }
                ImageOutcome::Rejected(rejection) => {
                    println!("\n[WARNING] {rejection}\n");
                    Ok(ExitCode::from(EXIT_REJECTED))
                }
            }
        }
        Commands::Video {
            source,
            target,
            reference,
            output,
            keep_fps,
            keep_frames,
            report,
        } => {
            let output = output.unwrap_or_else(|| swapped_path(&target));
            let (fps, resample) = extraction_rate(keep_fps, config.default_fps, || probe_fps(&target))?;
            let workdir = tempfile::Builder::new().prefix("swapface-").tempdir()?;

            let frames = extract_frames(&target, workdir.path(), resample)?;
            let summary = pipeline.process_video(
                &source,
                &frames,
                reference.as_deref(),
                &mut std::io::stdout().lock(),
            )?;
            write_report(report.as_deref(), &summary)?;

            let encoded = finish_video(&summary, workdir, keep_frames, |dir| {
                let silent = dir.join("video.mp4");
                assemble_video(dir, fps, &silent)?;
                restore_audio(&target, &silent, &output)
            })?;
            if encoded {
                println!("{}", output.display());
            }
            Ok(finish(&summary))
        }
        Commands::Frames {
            source,
            dir,
            reference,
            report,
        } => {
            let frames = list_frames(&dir)?;
            let summary = pipeline.process_video(
                &source,
                &frames,
                reference.as_deref(),
                &mut std::io::stdout().lock(),
            )?;
            write_report(report.as_deref(), &summary)?;
            Ok(finish(&summary))
        }
    }
}

/// Frame rate for encoding, and the rate to resample to during extraction.
///
/// Keeping the source rate extracts every frame; otherwise frames are
/// resampled to `default_fps` and `source_fps` is never run.
fn extraction_rate(
    keep_fps: bool,
    default_fps: f64,
    source_fps: impl FnOnce() -> Result<f64, VideoError>,
) -> Result<(f64, Option<f64>), VideoError> {
    if keep_fps {
        Ok((source_fps()?, None))
    } else {
        Ok((default_fps, Some(default_fps)))
    }
}

/// Encode the swapped frames in `workdir` when the run succeeded.
///
/// Returns whether `encode` ran. With `keep_frames` the directory outlives
/// the run, even when encoding fails.
fn finish_video(
    summary: &VideoReport,
    workdir: tempfile::TempDir,
    keep_frames: bool,
    encode: impl FnOnce(&Path) -> Result<(), VideoError>,
) -> Result<bool, VideoError> {
    let encoded = if summary.succeeded() {
        encode(workdir.path()).map(|()| true)
    } else {
        Ok(false)
    };

    if keep_frames {
        let kept = workdir.keep();
        tracing::info!(dir = %kept.display(), "kept extracted frames");
    }
    encoded
}

fn build_pipeline(config: &Config) -> Result<ModelPipeline> {
    let options = config.model_options();

    let analyser = FaceAnalyser::load(
        &config.detector_model_path(),
        &config.recognizer_model_path(),
        &options,
    )
    .context("failed to load face analysis models")?
    .with_detection_threshold(config.detection_threshold);

    let emap = config.swapper_emap_path();
    let swapper = InSwapper::load(&config.swapper_model_path(), emap.as_deref(), &options)
        .context("failed to load face swapper")?;

    let enhancer = if config.enhance {
        Some(FaceEnhancer::load(&config.enhancer_model_path(), &options).context("failed to load face enhancer")?)
    } else {
        None
    };

    tracing::info!(provider = %config.provider, enhance = config.enhance, "models ready");
    Ok(Pipeline::new(analyser, swapper, enhancer)
        .with_match_threshold(config.match_threshold)
        .with_black_ratio_threshold(config.black_ratio_threshold))
}

fn write_report(path: Option<&Path>, report: &VideoReport) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path, json).with_context(|| format!("failed to write report {}", path.display()))?;
    Ok(())
}

fn finish(report: &VideoReport) -> ExitCode {
    match &report.rejection {
        None => ExitCode::SUCCESS,
        Some(rejection) => {
            println!("\n[WARNING] {rejection}\n");
            ExitCode::from(EXIT_REJECTED)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Rejection;
    use std::cell::Cell;

    fn report(rejection: Option<Rejection>) -> VideoReport {
        VideoReport {
            frames: 3,
            swapped: 3,
            skipped: 0,
            failed: 0,
            rejection,
        }
    }

    fn scratch() -> tempfile::TempDir {
        tempfile::Builder::new().prefix("swapface-test-").tempdir().unwrap()
    }

    #[test]
    fn test_extraction_rate_resamples_to_default() {
        let queried = Cell::new(false);
        let rate = extraction_rate(false, 30.0, || {
            queried.set(true);
            Ok(25.0)
        })
        .unwrap();
        assert_eq!(rate, (30.0, Some(30.0)));
        assert!(!queried.get());
    }

    #[test]
    fn test_extraction_rate_keeps_source_fps() {
        let rate = extraction_rate(true, 30.0, || Ok(23.976)).unwrap();
        assert_eq!(rate, (23.976, None));
    }

    #[test]
    fn test_extraction_rate_propagates_frame_rate_error() {
        let err = extraction_rate(true, 30.0, || Err(VideoError::FrameRate("N/A".into()))).unwrap_err();
        assert!(matches!(err, VideoError::FrameRate(_)));
    }

    #[test]
    fn test_finish_video_encodes_and_cleans_up() {
        let workdir = scratch();
        let path = workdir.path().to_path_buf();
        let seen = Cell::new(None);

        let encoded = finish_video(&report(None), workdir, false, |dir| {
            seen.set(Some(dir.to_path_buf()));
            Ok(())
        })
        .unwrap();

        assert!(encoded);
        assert_eq!(seen.take(), Some(path.clone()));
        assert!(!path.exists());
    }

    #[test]
    fn test_finish_video_skips_encoding_after_rejection() {
        let workdir = scratch();
        let calls = Cell::new(0);

        let encoded = finish_video(&report(Some(Rejection::NoSourceFace)), workdir, false, |_| {
            calls.set(calls.get() + 1);
            Ok(())
        })
        .unwrap();

        assert!(!encoded);
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_finish_video_keeps_frames_when_encoding_fails() {
        let workdir = scratch();
        let path = workdir.path().to_path_buf();

        let err = finish_video(&report(None), workdir, true, |dir| Err(VideoError::NoFrames(dir.to_path_buf())))
            .unwrap_err();

        assert!(matches!(err, VideoError::NoFrames(_)));
        assert!(path.is_dir());
        std::fs::remove_dir_all(&path).unwrap();
    }

    #[test]
    fn test_write_report_json() {
        let dir = scratch();
        let path = dir.path().join("report.json");
        write_report(Some(&path), &report(Some(Rejection::NoReferenceFace))).unwrap();

        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["frames"], 3);
        assert_eq!(json["rejection"]["kind"], "no_reference_face");
        write_report(None, &report(None)).unwrap();
    }
}
