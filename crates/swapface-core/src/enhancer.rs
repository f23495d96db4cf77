//! GFPGAN face restoration via ONNX Runtime.
//!
//! Each face is aligned to the 512×512 FFHQ template, restored, and blended
//! back with the same feathered paste-back the swapper uses.

use crate::alignment::{self, FFHQ_TEMPLATE_512};
use crate::blend::paste_back;
use crate::session::{build_session, ModelOptions};
use crate::types::Face;
use image::{Rgb, RgbImage};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const GFPGAN_INPUT_SIZE: u32 = 512;

#[derive(Error, Debug)]
pub enum EnhancerError {
    #[error("model file not found: {0} (expected GFPGANv1.4.onnx)")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Anything that can restore face detail in an image.
pub trait EnhanceFaces {
    /// Returns the enhanced image; `faces` locate the regions to restore.
    fn enhance(&mut self, image: &RgbImage, faces: &[Face]) -> Result<RgbImage, EnhancerError>;
}

/// GFPGAN-based face enhancer.
pub struct FaceEnhancer {
    session: Session,
}

impl FaceEnhancer {
    pub fn load(model_path: &Path, options: &ModelOptions) -> Result<Self, EnhancerError> {
        if !model_path.exists() {
            return Err(EnhancerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = build_session(model_path, options)?;
        tracing::info!(path = %model_path.display(), "loaded GFPGAN model");

        Ok(Self { session })
    }

    fn restore(&mut self, aligned: &RgbImage) -> Result<RgbImage, EnhancerError> {
        let input = preprocess(aligned);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EnhancerError::InferenceFailed(format!("restoration output: {e}")))?;
        postprocess(data)
    }
}

impl EnhanceFaces for FaceEnhancer {
    fn enhance(&mut self, image: &RgbImage, faces: &[Face]) -> Result<RgbImage, EnhancerError> {
        let mut result = image.clone();
        for face in faces {
            let (aligned, transform) =
                alignment::align_to_template(&result, &face.landmarks, &FFHQ_TEMPLATE_512, GFPGAN_INPUT_SIZE);
            let restored = self.restore(&aligned)?;
            result = paste_back(&result, &restored, &transform);
        }
        tracing::trace!(faces = faces.len(), "enhanced faces");
        Ok(result)
    }
}

/// Map RGB to [-1, 1] NCHW.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = GFPGAN_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 / 255.0 - 0.5) / 0.5;
        }
    }
    tensor
}

/// Map a (1, 3, 512, 512) output in [-1, 1] back to RGB.
fn postprocess(data: &[f32]) -> Result<RgbImage, EnhancerError> {
    let size = GFPGAN_INPUT_SIZE as usize;
    let plane = size * size;
    if data.len() != 3 * plane {
        return Err(EnhancerError::InferenceFailed(format!(
            "expected {} output values, got {}",
            3 * plane,
            data.len()
        )));
    }

    let to_u8 = |v: f32| ((v.clamp(-1.0, 1.0) + 1.0) / 2.0 * 255.0).round() as u8;
    Ok(RgbImage::from_fn(GFPGAN_INPUT_SIZE, GFPGAN_INPUT_SIZE, |x, y| {
        let i = y as usize * size + x as usize;
        Rgb([to_u8(data[i]), to_u8(data[plane + i]), to_u8(data[2 * plane + i])])
    }))
}
