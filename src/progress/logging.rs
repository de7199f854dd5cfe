//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::BuildStarted {
                session_id,
                tag,
                engine,
                steps,
            } => {
                info!(session = %session_id, tag = %tag, engine = %engine, steps, "Starting build");
            }
            ProgressEvent::StageStarted { stage } => {
                info!(stage = %stage, "Starting stage");
            }
            ProgressEvent::StepStarted {
                index,
                total,
                instruction,
            } => {
                info!(
                    progress = format!("{}/{}", index, total),
                    instruction = %instruction,
                    "Running step"
                );
            }
            ProgressEvent::StageCompleted { stage, state } => {
                info!(stage = %stage, state = %state, "Stage complete");
            }
            ProgressEvent::EngineOutput { line } => {
                debug!(target: "runpack::engine", "{}", line);
            }
            ProgressEvent::BuildCompleted {
                image_id,
                tag,
                duration,
            } => {
                info!(
                    image = %image_id,
                    tag = %tag,
                    duration_ms = duration.as_millis(),
                    "Build complete"
                );
            }
            ProgressEvent::BuildFailed { stage, error } => match stage {
                Some(stage) => warn!(stage = %stage, error = %error, "Build failed"),
                None => warn!(error = %error, "Build failed"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{BuildState, Stage};
    use std::time::Duration;

    #[test]
    fn test_logging_all_events() {
        let handler = LoggingHandler;

        let events = vec![
            ProgressEvent::BuildStarted {
                session_id: "1234".to_string(),
                tag: "app:1".to_string(),
                engine: "docker".to_string(),
                steps: 7,
            },
            ProgressEvent::StageStarted { stage: Stage::Base },
            ProgressEvent::StepStarted {
                index: 1,
                total: 7,
                instruction: "FROM python:3.11-slim".to_string(),
            },
            ProgressEvent::StageCompleted {
                stage: Stage::Base,
                state: BuildState::BaseReady,
            },
            ProgressEvent::EngineOutput {
                line: " ---> 1a2b3c".to_string(),
            },
            ProgressEvent::BuildCompleted {
                image_id: "sha256:abc".to_string(),
                tag: "app:1".to_string(),
                duration: Duration::from_secs(3),
            },
            ProgressEvent::BuildFailed {
                stage: Some(Stage::AppDependencies),
                error: "pip failed".to_string(),
            },
            ProgressEvent::BuildFailed {
                stage: None,
                error: "engine unavailable".to_string(),
            },
        ];

        for event in events {
            handler.on_progress(&event);
        }
    }
}
