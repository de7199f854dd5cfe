//! Progress handler trait and events

use crate::builder::{BuildState, Stage};
use std::time::Duration;

/// Events emitted while a build session runs
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Plan submitted to an engine
    BuildStarted {
        session_id: String,
        tag: String,
        engine: String,
        steps: usize,
    },

    /// First step of a stage started
    StageStarted { stage: Stage },

    /// Engine started a step
    StepStarted {
        index: usize,
        total: usize,
        instruction: String,
    },

    /// Last step of a stage finished and the build state advanced
    StageCompleted { stage: Stage, state: BuildState },

    /// Raw engine output line
    EngineOutput { line: String },

    BuildCompleted {
        image_id: String,
        tag: String,
        duration: Duration,
    },

    BuildFailed { stage: Option<Stage>, error: String },
}

/// Trait for handling progress events during a build
pub trait ProgressHandler: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
