//! Engine error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::preflight::PreflightError;

/// Infrastructure-level failures. These are never retried and surface as
/// setup-required conditions.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No candidate location for a worker script exists.
    #[error("{id} script not found (looked in: {})", display_paths(.candidates))]
    PathNotFound { id: String, candidates: Vec<PathBuf> },

    /// The executable could not be started at all.
    #[error("failed to spawn {program}: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Dependency preflight aborted the run.
    #[error(transparent)]
    Preflight(#[from] PreflightError),

    /// Caller supplied unusable input.
    #[error("{0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
