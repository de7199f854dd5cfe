//! The seam between a build plan and whatever executes it

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("build engine unavailable: {0}")]
    Unavailable(String),

    #[error("failed to package build context: {0}")]
    Context(String),

    #[error("build step failed: {message}")]
    StepFailed {
        /// 1-based step number when the engine reported one
        step: Option<usize>,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub dockerfile: String,
    pub context_dir: PathBuf,
    pub tag: String,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// 1-based step index as reported by the engine
    StepStarted {
        index: usize,
        total: usize,
        instruction: String,
    },
    Output(String),
}

pub trait EngineObserver: Send + Sync {
    fn on_event(&self, event: EngineEvent);
}

impl<F> EngineObserver for F
where
    F: Fn(EngineEvent) + Send + Sync,
{
    fn on_event(&self, event: EngineEvent) {
        self(event)
    }
}

/// Executes a rendered Dockerfile against a build context and returns the image id
#[async_trait]
pub trait BuildEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn build(
        &self,
        request: &BuildRequest,
        observer: &dyn EngineObserver,
    ) -> Result<String, EngineError>;
}

fn step_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Step (\d+)/(\d+) : (.*)$").expect("valid regex"))
}

/// Parse the classic builder's `Step N/M : INSTRUCTION` progress line
pub fn parse_step_line(line: &str) -> Option<EngineEvent> {
    let caps = step_re().captures(line.trim_end())?;
    Some(EngineEvent::StepStarted {
        index: caps.get(1)?.as_str().parse().ok()?,
        total: caps.get(2)?.as_str().parse().ok()?,
        instruction: caps.get(3)?.as_str().to_string(),
    })
}

/// Reports every step without executing anything; the image id is the
/// Dockerfile fingerprint.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlanOnlyEngine;

#[async_trait]
impl BuildEngine for PlanOnlyEngine {
    fn name(&self) -> &str {
        "plan-only"
    }

    async fn build(
        &self,
        request: &BuildRequest,
        observer: &dyn EngineObserver,
    ) -> Result<String, EngineError> {
        use sha2::{Digest, Sha256};

        let instructions: Vec<&str> = request
            .dockerfile
            .lines()
            .filter(|l| !l.trim().is_empty())
            .collect();
        let total = instructions.len();
        for (i, instruction) in instructions.into_iter().enumerate() {
            observer.on_event(EngineEvent::StepStarted {
                index: i + 1,
                total,
                instruction: instruction.to_string(),
            });
        }

        let digest = hex::encode(Sha256::digest(request.dockerfile.as_bytes()));
        Ok(format!("sha256:{}", digest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_parse_step_line() {
        assert_eq!(
            parse_step_line("Step 3/7 : WORKDIR /app\n"),
            Some(EngineEvent::StepStarted {
                index: 3,
                total: 7,
                instruction: "WORKDIR /app".to_string()
            })
        );
        assert_eq!(parse_step_line(" ---> Running in 1a2b3c"), None);
    }

    #[tokio::test]
    async fn test_plan_only_reports_every_step() {
        let events = Mutex::new(Vec::new());
        let observer = |event: EngineEvent| events.lock().unwrap().push(event);
        let request = BuildRequest {
            dockerfile: "FROM python:3.11-slim\nWORKDIR /app\nCOPY . .\n".to_string(),
            context_dir: PathBuf::from("."),
            tag: "app:test".to_string(),
            labels: HashMap::new(),
        };

        let id = PlanOnlyEngine.build(&request, &observer).await.unwrap();
        assert!(id.starts_with("sha256:"));
        assert_eq!(id.len(), "sha256:".len() + 64);

        let events = events.into_inner().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            EngineEvent::StepStarted {
                index: 3,
                total: 3,
                instruction: "COPY . .".to_string()
            }
        );
    }
}
