use super::engine::EngineError;
use super::state::{BuildState, Stage};
use crate::descriptor::ReferenceError;
use crate::launcher::LaunchError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("invalid base image: {0}")]
    InvalidBase(#[from] ReferenceError),

    #[error("base image '{0}' is not pinned; use an explicit tag other than 'latest' or a digest")]
    FloatingBase(String),

    #[error("invalid system package name '{0}'")]
    InvalidPackage(String),

    #[error("invalid dependency manifest path '{0}'")]
    InvalidManifestPath(String),

    #[error("invalid source path: {0}")]
    InvalidSourcePath(String),

    #[error("invalid build state transition {from} -> {to}")]
    InvalidTransition { from: BuildState, to: BuildState },

    #[error("{stage} stage failed ({}): {message}", stage.failure_description())]
    StageFailed { stage: Stage, message: String },

    #[error("invalid runtime contract: {0}")]
    Contract(#[from] LaunchError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl BuildError {
    /// Stage a failure belongs to, when it came from the engine
    pub fn stage(&self) -> Option<Stage> {
        match self {
            BuildError::StageFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
