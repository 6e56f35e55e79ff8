use crate::all::*;

use thiserror::Error;

// Failures of a whole calibration run. Problems with single images never end
// up here, they are recorded in the `CalibrationReport` instead.
#[derive(Debug, Error)]
pub enum CalibrationError {
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("need at least {required} images with a detected checkerboard, found {found}")]
  InsufficientData { found: usize, required: usize },

  #[error("calibration failed, insufficient pose diversity: {0}")]
  DegeneratePoses(String),

  #[error("refinement did not converge in {iterations} iterations (rms {rms:.4} px)")]
  NonConvergence {
    // Best model reached before giving up, for callers that accept partial results.
    calibration: Box<Calibration>,
    rms: f64,
    iterations: usize,
  },

  #[error("failed to list images in {path}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

// Failures of `IntrinsicSolver::solve()`. The orchestrator lifts these into
// `CalibrationError` once the refractive part of the model is attached.
#[derive(Debug, Error)]
pub enum SolverError {
  #[error("need at least {required} views, got {found}")]
  InsufficientViews { found: usize, required: usize },

  #[error("view {view}: {reason}")]
  InvalidView { view: usize, reason: String },

  #[error("{0}")]
  Degenerate(String),

  #[error("no convergence after {iterations} iterations")]
  NonConvergence {
    best: Box<IntrinsicSolution>,
    iterations: usize,
  },
}

pub type CalibrationResult<T> = std::result::Result<T, CalibrationError>;
