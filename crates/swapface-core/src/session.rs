//! Shared ONNX Runtime session construction.

use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::Session;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

/// Hardware backend used to run every model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    #[default]
    Cpu,
    /// CUDA with CPU fallback for unsupported nodes.
    Cuda,
}

impl ExecutionProvider {
    fn dispatch(self) -> Vec<ExecutionProviderDispatch> {
        match self {
            ExecutionProvider::Cpu => vec![CPUExecutionProvider::default().build()],
            ExecutionProvider::Cuda => vec![
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
        }
    }
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionProvider::Cpu => f.write_str("cpu"),
            ExecutionProvider::Cuda => f.write_str("cuda"),
        }
    }
}

impl FromStr for ExecutionProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(ExecutionProvider::Cpu),
            "cuda" | "gpu" => Ok(ExecutionProvider::Cuda),
            other => Err(format!("unknown execution provider: {other}")),
        }
    }
}

/// Options shared by every model session.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub provider: ExecutionProvider,
    pub intra_threads: usize,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            provider: ExecutionProvider::Cpu,
            intra_threads: 2,
        }
    }
}

/// Build a session for `model_path`. Callers check that the file exists first.
pub(crate) fn build_session(model_path: &Path, options: &ModelOptions) -> Result<Session, ort::Error> {
    let session = Session::builder()?
        .with_execution_providers(options.provider.dispatch())?
        .with_intra_threads(options.intra_threads.max(1))?
        .commit_from_file(model_path)?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!("cpu".parse::<ExecutionProvider>(), Ok(ExecutionProvider::Cpu));
        assert_eq!(" CUDA ".parse::<ExecutionProvider>(), Ok(ExecutionProvider::Cuda));
        assert_eq!("gpu".parse::<ExecutionProvider>(), Ok(ExecutionProvider::Cuda));
        assert!("tpu".parse::<ExecutionProvider>().is_err());
    }

    #[test]
    fn test_provider_display_roundtrips() {
        for p in [ExecutionProvider::Cpu, ExecutionProvider::Cuda] {
            assert_eq!(p.to_string().parse::<ExecutionProvider>(), Ok(p));
        }
    }
}
