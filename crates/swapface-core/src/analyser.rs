//! Face analysis: detection followed by identity embedding for every face.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::session::ModelOptions;
use crate::types::Face;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyserError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Anything that can turn an image into analysed faces.
pub trait AnalyseFaces {
    /// Faces in detector order (descending confidence).
    fn analyse(&mut self, image: &RgbImage) -> Result<Vec<Face>, AnalyserError>;
}

/// SCRFD detection + ArcFace embedding.
pub struct FaceAnalyser {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FaceAnalyser {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self { detector, recognizer }
    }

    pub fn load(
        detector_path: &Path,
        recognizer_path: &Path,
        options: &ModelOptions,
    ) -> Result<Self, AnalyserError> {
        let detector = FaceDetector::load(detector_path, options)?;
        let recognizer = FaceRecognizer::load(recognizer_path, options)?;
        Ok(Self::new(detector, recognizer))
    }

    /// Set the detector's minimum confidence.
    pub fn with_detection_threshold(self, threshold: f32) -> Self {
        Self {
            detector: self.detector.with_confidence_threshold(threshold),
            recognizer: self.recognizer,
        }
    }
}

impl AnalyseFaces for FaceAnalyser {
    fn analyse(&mut self, image: &RgbImage) -> Result<Vec<Face>, AnalyserError> {
        let detections = self.detector.detect(image)?;
        let mut faces = Vec::with_capacity(detections.len());

        for bbox in detections {
            // Recognition and swapping both need the five alignment points.
            let Some(landmarks) = bbox.landmarks else {
                tracing::debug!(confidence = bbox.confidence, "skipping detection without landmarks");
                continue;
            };
            let embedding = self.recognizer.extract(image, &landmarks)?;
            faces.push(Face { bbox, landmarks, embedding });
        }

        Ok(faces)
    }
}

/// The face furthest to the left, used as "the" face of a single-subject image.
pub fn leftmost_face(faces: Vec<Face>) -> Option<Face> {
    faces
        .into_iter()
        .min_by(|a, b| a.bbox.x.partial_cmp(&b.bbox.x).unwrap_or(std::cmp::Ordering::Equal))
}
