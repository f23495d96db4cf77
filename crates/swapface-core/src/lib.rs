//! swapface-core: face analysis, swapping and restoration engine.
//!
//! Uses SCRFD for face detection, ArcFace for identity embeddings,
//! inswapper_128 for face swapping and GFPGAN for restoration, all running
//! via ONNX Runtime.

pub mod alignment;
pub mod analyser;
pub mod blend;
pub mod detector;
pub mod enhancer;
pub mod quality;
pub mod recognizer;
pub mod session;
pub mod swapper;
pub mod types;

pub use analyser::{leftmost_face, AnalyseFaces, AnalyserError, FaceAnalyser};
pub use detector::{DetectorError, FaceDetector};
pub use enhancer::{EnhanceFaces, EnhancerError, FaceEnhancer};
pub use quality::{black_ratio, is_swap_successful};
pub use recognizer::{FaceRecognizer, RecognizerError};
pub use session::{ExecutionProvider, ModelOptions};
pub use swapper::{InSwapper, SwapFace, SwapperError};
pub use types::{BoundingBox, CosineMatcher, Embedding, Face, Matcher};
