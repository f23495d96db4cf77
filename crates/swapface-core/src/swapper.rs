//! inswapper_128 face swapper via ONNX Runtime.
//!
//! The target face is aligned to a 128×128 ArcFace crop, re-rendered with the
//! source identity, and pasted back into the frame.

use crate::alignment;
use crate::blend::paste_back;
use crate::recognizer::ARCFACE_EMBEDDING_DIM;
use crate::session::{build_session, ModelOptions};
use crate::types::{Embedding, Face};
use image::{Rgb, RgbImage};
use ndarray::{Array1, Array2, Array4, Axis};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INSWAPPER_INPUT_SIZE: u32 = 128;

#[derive(Error, Debug)]
pub enum SwapperError {
    #[error("model file not found: {0} (expected inswapper_128_fp16.onnx)")]
    ModelNotFound(String),
    #[error("invalid emap file {path}: {reason}")]
    InvalidEmap { path: String, reason: String },
    #[error("source embedding has {0} values, expected {expected}", expected = ARCFACE_EMBEDDING_DIM)]
    EmbeddingSize(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that can render `source`'s identity onto `target` within a frame.
pub trait SwapFace {
    /// Returns the full frame with the swapped face pasted back.
    fn swap(&mut self, frame: &RgbImage, target: &Face, source: &Face) -> Result<RgbImage, SwapperError>;
}

/// inswapper_128-based face swapper.
pub struct InSwapper {
    session: Session,
    /// Embedding → latent projection; identity when absent.
    emap: Option<Array2<f32>>,
}

impl InSwapper {
    /// Load the swapper model and, if given, its emap sidecar.
    pub fn load(
        model_path: &Path,
        emap_path: Option<&Path>,
        options: &ModelOptions,
    ) -> Result<Self, SwapperError> {
        if !model_path.exists() {
            return Err(SwapperError::ModelNotFound(model_path.display().to_string()));
        }

        let emap = match emap_path {
            Some(path) => Some(load_emap(path)?),
            None => {
                tracing::warn!("no emap configured for inswapper; source embeddings are used unprojected");
                None
            }
        };

        let session = build_session(model_path, options)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            emap = emap.is_some(),
            "loaded inswapper model"
        );

        Ok(Self { session, emap })
    }

    /// Project a source embedding into the swapper's latent space.
    pub fn latent(&self, source: &Embedding) -> Result<Array2<f32>, SwapperError> {
        project_latent(source, self.emap.as_ref())
    }

    /// Scale an aligned 128×128 RGB crop to [0, 1] NCHW.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let size = INSWAPPER_INPUT_SIZE as usize;
        let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, pixel) in crop.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = pixel.0[c] as f32 / 255.0;
            }
        }
        tensor
    }

    /// Convert a (1, 3, 128, 128) output in [0, 1] back to an RGB crop.
    fn postprocess(data: &[f32]) -> Result<RgbImage, SwapperError> {
        let size = INSWAPPER_INPUT_SIZE as usize;
        let plane = size * size;
        if data.len() != 3 * plane {
            return Err(SwapperError::InferenceFailed(format!(
                "expected {} output values, got {}",
                3 * plane,
                data.len()
            )));
        }

        let to_u8 = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Ok(RgbImage::from_fn(INSWAPPER_INPUT_SIZE, INSWAPPER_INPUT_SIZE, |x, y| {
            let i = y as usize * size + x as usize;
            Rgb([to_u8(data[i]), to_u8(data[plane + i]), to_u8(data[2 * plane + i])])
        }))
    }
}

impl SwapFace for InSwapper {
    fn swap(&mut self, frame: &RgbImage, target: &Face, source: &Face) -> Result<RgbImage, SwapperError> {
        let (crop, transform) = alignment::norm_crop(frame, &target.landmarks, INSWAPPER_INPUT_SIZE);
        let target_tensor = Self::preprocess(&crop);
        let latent = self.latent(&source.embedding)?;

        let outputs = self.session.run(ort::inputs![
            "target" => TensorRef::from_array_view(target_tensor.view())?,
            "source" => TensorRef::from_array_view(latent.view())?,
        ])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| SwapperError::InferenceFailed(format!("swap output: {e}")))?;
        let fake = Self::postprocess(data)?;

        Ok(paste_back(frame, &fake, &transform))
    }
}

/// Normalize, project through `emap` and normalize again. Shape (1, 512).
fn project_latent(source: &Embedding, emap: Option<&Array2<f32>>) -> Result<Array2<f32>, SwapperError> {
    if source.values.len() != ARCFACE_EMBEDDING_DIM {
        return Err(SwapperError::EmbeddingSize(source.values.len()));
    }

    let normed = Array1::from(source.normalized());
    let mut latent = match emap {
        Some(emap) => normed.dot(emap),
        None => normed,
    };

    let norm = latent.dot(&latent).sqrt();
    if norm > 0.0 {
        latent /= norm;
    }

    Ok(latent.insert_axis(Axis(0)))
}

/// Read a 512×512 emap stored as row-major little-endian f32 values.
pub fn load_emap(path: &Path) -> Result<Array2<f32>, SwapperError> {
    let bytes = std::fs::read(path)?;
    let expected = ARCFACE_EMBEDDING_DIM * ARCFACE_EMBEDDING_DIM * 4;
    if bytes.len() != expected {
        return Err(SwapperError::InvalidEmap {
            path: path.display().to_string(),
            reason: format!("expected {expected} bytes, got {}", bytes.len()),
        });
    }

    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Array2::from_shape_vec((ARCFACE_EMBEDDING_DIM, ARCFACE_EMBEDDING_DIM), values).map_err(|e| {
        SwapperError::InvalidEmap {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    })
}
