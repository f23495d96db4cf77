use serde::Deserialize;
use std::path::{Path, PathBuf};
use swapface_core::{CosineMatcher, ExecutionProvider, ModelOptions};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Runtime configuration.
///
/// Layered: defaults, then an optional TOML file, then `SWAPFACE_*`
/// environment variables, then command-line flags (applied by `main`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD detection model, relative to `model_dir` unless absolute.
    pub detector_model: String,
    /// ArcFace recognition model.
    pub recognizer_model: String,
    /// inswapper model.
    pub swapper_model: String,
    /// Raw little-endian f32 512×512 emap matching `swapper_model`.
    pub swapper_emap: Option<String>,
    /// GFPGAN restoration model.
    pub enhancer_model: String,
    /// Run GFPGAN over swapped faces.
    pub enhance: bool,
    pub provider: ExecutionProvider,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Minimum SCRFD score for a detection.
    pub detection_threshold: f32,
    /// Cosine distance below which a frame face matches the reference face.
    pub match_threshold: f32,
    /// A swap is rejected when this share of pixels (or more) is pure black.
    pub black_ratio_threshold: f32,
    /// Frame rate used for video extraction unless the source rate is kept.
    pub default_fps: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            detector_model: "det_10g.onnx".to_string(),
            recognizer_model: "w600k_r50.onnx".to_string(),
            swapper_model: "inswapper_128_fp16.onnx".to_string(),
            swapper_emap: Some("inswapper_emap.bin".to_string()),
            enhancer_model: "GFPGANv1.4.onnx".to_string(),
            enhance: true,
            provider: ExecutionProvider::Cpu,
            intra_threads: 2,
            detection_threshold: swapface_core::detector::SCRFD_CONFIDENCE_THRESHOLD,
            match_threshold: CosineMatcher::DEFAULT_THRESHOLD,
            black_ratio_threshold: swapface_core::quality::DEFAULT_BLACK_RATIO_THRESHOLD,
            default_fps: 30.0,
        }
    }
}

/// `$XDG_DATA_HOME/swapface/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("swapface")
        .join("models")
}

impl Config {
    /// Load defaults, the optional TOML file, then process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `SWAPFACE_*` overrides from `var`. Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("SWAPFACE_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(v) = var("SWAPFACE_DETECTOR_MODEL") {
            self.detector_model = v;
        }
        if let Some(v) = var("SWAPFACE_RECOGNIZER_MODEL") {
            self.recognizer_model = v;
        }
        if let Some(v) = var("SWAPFACE_SWAPPER_MODEL") {
            self.swapper_model = v;
        }
        if let Some(v) = var("SWAPFACE_SWAPPER_EMAP") {
            // empty disables the projection
            self.swapper_emap = (!v.is_empty()).then_some(v);
        }
        if let Some(v) = var("SWAPFACE_ENHANCER_MODEL") {
            self.enhancer_model = v;
        }
        if let Some(v) = var("SWAPFACE_ENHANCE") {
            self.enhance = v != "0" && !v.eq_ignore_ascii_case("false");
        }
        env_parse(&var, "SWAPFACE_PROVIDER", &mut self.provider);
        env_parse(&var, "SWAPFACE_INTRA_THREADS", &mut self.intra_threads);
        env_parse(&var, "SWAPFACE_DETECTION_THRESHOLD", &mut self.detection_threshold);
        env_parse(&var, "SWAPFACE_MATCH_THRESHOLD", &mut self.match_threshold);
        env_parse(&var, "SWAPFACE_BLACK_RATIO_THRESHOLD", &mut self.black_ratio_threshold);
        env_parse(&var, "SWAPFACE_DEFAULT_FPS", &mut self.default_fps);
    }

    fn model_path(&self, file: &str) -> PathBuf {
        // join keeps absolute paths as-is
        self.model_dir.join(file)
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_path(&self.detector_model)
    }

    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_path(&self.recognizer_model)
    }

    pub fn swapper_model_path(&self) -> PathBuf {
        self.model_path(&self.swapper_model)
    }

    /// The emap path, or `None` when unset or missing on disk.
    pub fn swapper_emap_path(&self) -> Option<PathBuf> {
        let path = self.model_path(self.swapper_emap.as_deref()?);
        if path.exists() {
            Some(path)
        } else {
            tracing::warn!(path = %path.display(), "configured emap not found");
            None
        }
    }

    pub fn enhancer_model_path(&self) -> PathBuf {
        self.model_path(&self.enhancer_model)
    }

    pub fn model_options(&self) -> ModelOptions {
        ModelOptions {
            provider: self.provider,
            intra_threads: self.intra_threads,
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = var(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable environment override"),
    }
}
