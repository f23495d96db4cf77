//! Video frame extraction and re-assembly through the `ffmpeg` executables.

use crate::frame::{has_extension, list_frames, FrameError};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

const VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "mkv", "mov", "avi", "webm", "m4v", "gif"];

/// File name pattern for extracted frames (`0001.png`, `0002.png`, ...).
pub const FRAME_PATTERN: &str = "%04d.png";

#[derive(Debug, thiserror::Error)]
pub enum VideoError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("could not parse frame rate {0:?}")]
    FrameRate(String),
    #[error("no frames were extracted from {0}")]
    NoFrames(PathBuf),
    #[error(transparent)]
    Frames(#[from] FrameError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// True for file extensions treated as video input.
pub fn is_video(path: &Path) -> bool {
    has_extension(path, &VIDEO_EXTENSIONS)
}

/// Run a tool to completion, returning stdout; non-zero exit is an error.
fn run(program: &'static str, args: &[&OsStr]) -> Result<String, VideoError> {
    tracing::debug!(program, ?args, "running");
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|source| VideoError::Spawn { program, source })?;

    if !output.status.success() {
        return Err(VideoError::Failed {
            program,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse an ffprobe rate such as `30000/1001` or `25`.
pub fn parse_frame_rate(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let fps = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => raw.parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Frame rate of the first video stream.
pub fn probe_fps(video: &Path) -> Result<f64, VideoError> {
    let stdout = run(
        "ffprobe",
        &[
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-select_streams"),
            OsStr::new("v:0"),
            OsStr::new("-show_entries"),
            OsStr::new("stream=r_frame_rate"),
            OsStr::new("-of"),
            OsStr::new("default=noprint_wrappers=1:nokey=1"),
            video.as_os_str(),
        ],
    )?;
    let line = stdout.lines().next().unwrap_or_default();
    parse_frame_rate(line).ok_or_else(|| VideoError::FrameRate(line.to_string()))
}

/// Whether the file carries at least one audio stream.
pub fn has_audio(video: &Path) -> Result<bool, VideoError> {
    let stdout = run(
        "ffprobe",
        &[
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-select_streams"),
            OsStr::new("a"),
            OsStr::new("-show_entries"),
            OsStr::new("stream=index"),
            OsStr::new("-of"),
            OsStr::new("csv=p=0"),
            video.as_os_str(),
        ],
    )?;
    Ok(!stdout.trim().is_empty())
}

/// Decode `video` into `dir/0001.png, ...`, resampled to `fps` when given.
pub fn extract_frames(video: &Path, dir: &Path, fps: Option<f64>) -> Result<Vec<PathBuf>, VideoError> {
    let pattern = dir.join(FRAME_PATTERN);
    let filter = fps.map(|fps| format!("fps={fps}"));

    let mut args: Vec<&OsStr> = vec![
        OsStr::new("-y"),
        OsStr::new("-loglevel"),
        OsStr::new("error"),
        OsStr::new("-hwaccel"),
        OsStr::new("auto"),
        OsStr::new("-i"),
        video.as_os_str(),
    ];
    if let Some(filter) = &filter {
        args.push(OsStr::new("-vf"));
        args.push(OsStr::new(filter));
    }
    args.push(pattern.as_os_str());

    tracing::info!(video = %video.display(), dir = %dir.display(), ?fps, "extracting frames");
    run("ffmpeg", &args)?;

    let frames = list_frames(dir)?;
    if frames.is_empty() {
        return Err(VideoError::NoFrames(video.to_path_buf()));
    }
    Ok(frames)
}

/// Encode `dir/%04d.png` into `output` at `fps` (libx264, crf 7, yuv420p).
pub fn assemble_video(dir: &Path, fps: f64, output: &Path) -> Result<(), VideoError> {
    let pattern = dir.join(FRAME_PATTERN);
    let rate = fps.to_string();

    tracing::info!(dir = %dir.display(), output = %output.display(), fps, "assembling video");
    run(
        "ffmpeg",
        &[
            OsStr::new("-y"),
            OsStr::new("-loglevel"),
            OsStr::new("error"),
            OsStr::new("-framerate"),
            OsStr::new(&rate),
            OsStr::new("-i"),
            pattern.as_os_str(),
            OsStr::new("-c:v"),
            OsStr::new("libx264"),
            OsStr::new("-crf"),
            OsStr::new("7"),
            OsStr::new("-pix_fmt"),
            OsStr::new("yuv420p"),
            output.as_os_str(),
        ],
    )?;
    Ok(())
}

/// Mux the video stream of `silent` with the audio of `original` into `output`.
///
/// When the original has no audio, `silent` is moved to `output` unchanged.
pub fn restore_audio(original: &Path, silent: &Path, output: &Path) -> Result<(), VideoError> {
    if !has_audio(original)? {
        tracing::info!(original = %original.display(), "source video has no audio track");
        // rename fails across filesystems; the temp dir may live elsewhere
        if std::fs::rename(silent, output).is_err() {
            std::fs::copy(silent, output)?;
        }
        return Ok(());
    }

    run(
        "ffmpeg",
        &[
            OsStr::new("-y"),
            OsStr::new("-loglevel"),
            OsStr::new("error"),
            OsStr::new("-i"),
            silent.as_os_str(),
            OsStr::new("-i"),
            original.as_os_str(),
            OsStr::new("-c:v"),
            OsStr::new("copy"),
            OsStr::new("-map"),
            OsStr::new("0:v:0"),
            OsStr::new("-map"),
            OsStr::new("1:a:0"),
            OsStr::new("-shortest"),
            output.as_os_str(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate_fraction() {
        let fps = parse_frame_rate("30000/1001").unwrap();
        assert!((fps - 29.97).abs() < 0.01);
    }

    #[test]
    fn test_parse_frame_rate_integer() {
        assert_eq!(parse_frame_rate("25\n"), Some(25.0));
        assert_eq!(parse_frame_rate("24/1"), Some(24.0));
    }

    #[test]
    fn test_parse_frame_rate_invalid() {
        assert_eq!(parse_frame_rate(""), None);
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
        assert_eq!(parse_frame_rate("-5"), None);
    }

    #[test]
    fn test_is_video() {
        assert!(is_video(Path::new("clip.MP4")));
        assert!(is_video(Path::new("/tmp/a.webm")));
        assert!(!is_video(Path::new("face.jpg")));
    }

    #[test]
    fn test_missing_program_is_spawn_error() {
        let err = run("swapface-definitely-not-a-program", &[]).unwrap_err();
        assert!(matches!(err, VideoError::Spawn { .. }));
    }
}
