use image::RgbImage;
use serde::Serialize;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use swapface_core::{
    black_ratio, is_swap_successful, leftmost_face, AnalyseFaces, AnalyserError, CosineMatcher, EnhanceFaces,
    EnhancerError, Face, Matcher, SwapFace, SwapperError,
};
use swapface_media::{load_rgb, save_rgb, FrameError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("analysis failed: {0}")]
    Analyser(#[from] AnalyserError),
    #[error("swap failed: {0}")]
    Swapper(#[from] SwapperError),
    #[error("enhancement failed: {0}")]
    Enhancer(#[from] EnhancerError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a run produced no output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rejection {
    NoTargetFace,
    NoSourceFace,
    NoReferenceFace,
    FaceCountMismatch { source: usize, target: usize },
    SwapUnsuccessful { black_ratio: f32 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTargetFace => {
                write!(f, "No face detected in target image. Please try another one.")
            }
            Self::NoSourceFace => {
                write!(f, "No face detected in source image. Please try with another one.")
            }
            Self::NoReferenceFace => {
                write!(f, "No face detected in reference image. Please try with another one.")
            }
            Self::FaceCountMismatch { source, target } => write!(
                f,
                "Number of faces detected in source ({source}) and target ({target}) images do not match. Please try with another one."
            ),
            Self::SwapUnsuccessful { black_ratio } => write!(
                f,
                "Face swap was unsuccessful ({:.1}% black pixels).",
                black_ratio * 100.0
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageOutcome {
    Swapped(PathBuf),
    Rejected(Rejection),
}

/// Per-run tally for a frame sequence.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VideoReport {
    pub frames: usize,
    pub swapped: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rejection: Option<Rejection>,
}

impl VideoReport {
    fn rejected(frames: usize, rejection: Rejection) -> Self {
        Self {
            frames,
            rejection: Some(rejection),
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.rejection.is_none()
    }
}

/// Progress marks written after each frame's percentage.
const MARK_SWAPPED: char = '.';
const MARK_SKIPPED: char = 'S';
const MARK_FAILED: char = 'E';

enum FrameOutcome {
    Swapped,
    NoFace,
    Unsuccessful(f32),
}

/// Swap, enhance and validate images or frame sequences.
pub struct Pipeline<A, S, E> {
    analyser: A,
    swapper: S,
    enhancer: Option<E>,
    matcher: CosineMatcher,
    black_ratio_threshold: f32,
}

impl<A: AnalyseFaces, S: SwapFace, E: EnhanceFaces> Pipeline<A, S, E> {
    pub fn new(analyser: A, swapper: S, enhancer: Option<E>) -> Self {
        Self {
            analyser,
            swapper,
            enhancer,
            matcher: CosineMatcher::default(),
            black_ratio_threshold: swapface_core::quality::DEFAULT_BLACK_RATIO_THRESHOLD,
        }
    }

    pub fn with_match_threshold(mut self, threshold: f32) -> Self {
        self.matcher = CosineMatcher::new(threshold);
        self
    }

    pub fn with_black_ratio_threshold(mut self, threshold: f32) -> Self {
        self.black_ratio_threshold = threshold;
        self
    }

    /// Swap every source face onto the target face at the same detector index.
    ///
    /// Writes to `output`, or `swapped-<name>` beside the target.
    pub fn process_image(
        &mut self,
        source: &Path,
        target: &Path,
        output: Option<&Path>,
    ) -> Result<ImageOutcome, PipelineError> {
        let frame = load_rgb(target)?;
        let source_image = load_rgb(source)?;

        let target_faces = self.analyser.analyse(&frame)?;
        let source_faces = self.analyser.analyse(&source_image)?;
        tracing::debug!(
            source = source_faces.len(),
            target = target_faces.len(),
            "analysed image pair"
        );

        if target_faces.is_empty() {
            return Ok(ImageOutcome::Rejected(Rejection::NoTargetFace));
        }
        if source_faces.is_empty() {
            return Ok(ImageOutcome::Rejected(Rejection::NoSourceFace));
        }
        if source_faces.len() != target_faces.len() {
            return Ok(ImageOutcome::Rejected(Rejection::FaceCountMismatch {
                source: source_faces.len(),
                target: target_faces.len(),
            }));
        }

        let mut result = frame;
        for (target_face, source_face) in target_faces.iter().zip(&source_faces) {
            result = self.swapper.swap(&result, target_face, source_face)?;
        }
        let result = self.enhance(result, &target_faces)?;

        if let Some(black_ratio) = self.failed_black_ratio(&result) {
            return Ok(ImageOutcome::Rejected(Rejection::SwapUnsuccessful { black_ratio }));
        }

        let path = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| swapface_media::swapped_path(target));
        save_rgb(&result, &path)?;
        tracing::info!(path = %path.display(), faces = target_faces.len(), "wrote swapped image");
        Ok(ImageOutcome::Swapped(path))
    }

    /// Swap the source identity into each frame file in place.
    ///
    /// With `reference`, only the first face matching it is replaced; otherwise
    /// the first detected face. Per-frame failures are counted and skipped, but
    /// an unsuccessful swap stops the run.
    pub fn process_video(
        &mut self,
        source: &Path,
        frames: &[PathBuf],
        reference: Option<&Path>,
        progress: &mut impl Write,
    ) -> Result<VideoReport, PipelineError> {
        let source_image = load_rgb(source)?;
        let Some(source_face) = leftmost_face(self.analyser.analyse(&source_image)?) else {
            return Ok(VideoReport::rejected(frames.len(), Rejection::NoSourceFace));
        };

        let reference_face = match reference {
            Some(path) => {
                let image = load_rgb(path)?;
                match leftmost_face(self.analyser.analyse(&image)?) {
                    Some(face) => Some(face),
                    None => {
                        return Ok(VideoReport::rejected(frames.len(), Rejection::NoReferenceFace));
                    }
                }
            }
            None => None,
        };

        let mut report = VideoReport {
            frames: frames.len(),
            ..VideoReport::default()
        };

        for (index, path) in frames.iter().enumerate() {
            write!(progress, "{:.2}%", index as f64 / frames.len() as f64 * 100.0)?;

            let mark = match self.process_frame(path, &source_face, reference_face.as_ref()) {
                Ok(FrameOutcome::Swapped) => {
                    report.swapped += 1;
                    MARK_SWAPPED
                }
                Ok(FrameOutcome::NoFace) => {
                    report.skipped += 1;
                    MARK_SKIPPED
                }
                Ok(FrameOutcome::Unsuccessful(ratio)) => {
                    writeln!(progress)?;
                    tracing::warn!(frame = %path.display(), black_ratio = ratio, "swap unsuccessful, stopping");
                    report.rejection = Some(Rejection::SwapUnsuccessful { black_ratio: ratio });
                    return Ok(report);
                }
                Err(e) => {
                    tracing::debug!(frame = %path.display(), error = %e, "frame failed");
                    report.failed += 1;
                    MARK_FAILED
                }
            };
            write!(progress, "{mark}")?;
            progress.flush()?;
        }
        writeln!(progress)?;

        tracing::info!(
            frames = report.frames,
            swapped = report.swapped,
            skipped = report.skipped,
            failed = report.failed,
            "processed frames"
        );
        Ok(report)
    }

    fn process_frame(
        &mut self,
        path: &Path,
        source: &Face,
        reference: Option<&Face>,
    ) -> Result<FrameOutcome, PipelineError> {
        let frame = load_rgb(path)?;
        let faces = self.analyser.analyse(&frame)?;

        let target = match reference {
            Some(reference) => faces
                .into_iter()
                .find(|face| self.matcher.is_match(&face.embedding, &reference.embedding)),
            None => faces.into_iter().next(),
        };
        let Some(target) = target else {
            return Ok(FrameOutcome::NoFace);
        };

        let result = self.swapper.swap(&frame, &target, source)?;
        let result = self.enhance(result, std::slice::from_ref(&target))?;
        if let Some(ratio) = self.failed_black_ratio(&result) {
            return Ok(FrameOutcome::Unsuccessful(ratio));
        }

        save_rgb(&result, path)?;
        Ok(FrameOutcome::Swapped)
    }

    fn enhance(&mut self, image: RgbImage, faces: &[Face]) -> Result<RgbImage, PipelineError> {
        match self.enhancer.as_mut() {
            Some(enhancer) => Ok(enhancer.enhance(&image, faces)?),
            None => Ok(image),
        }
    }

    /// The black-pixel share when it fails the success check.
    fn failed_black_ratio(&self, image: &RgbImage) -> Option<f32> {
        let ratio = black_ratio(image);
        (!is_swap_successful(image, self.black_ratio_threshold)).then_some(ratio)
    }
}
