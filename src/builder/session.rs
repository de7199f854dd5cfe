//! Build execution: runs a plan through an engine and tracks stage progress
//!
//! Engine step numbers map one-to-one onto plan steps. A step counts as done
//! once the engine starts the next one, or once the whole build succeeds; the
//! states listed on a completed step are then applied in order.

use super::engine::{BuildEngine, BuildRequest, EngineError, EngineEvent, EngineObserver};
use super::error::BuildError;
use super::plan::BuildPlan;
use super::state::{BuildState, Stage, StateMachine};
use crate::progress::{ProgressEvent, ProgressHandler};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const FINGERPRINT_LABEL: &str = "io.runpack.fingerprint";

/// A successfully built and tagged image
#[derive(Debug, Clone, Serialize)]
pub struct BuiltImage {
    pub id: String,
    pub tag: String,
    pub fingerprint: String,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    pub finished_at: DateTime<Utc>,
}

mod duration_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[derive(Debug)]
struct StageTracker {
    machine: StateMachine,
    /// Plan steps whose states have been applied
    completed: usize,
    /// 0-based plan index of the step the engine is running
    current: Option<usize>,
    output: Vec<String>,
}

pub struct BuildSession {
    id: Uuid,
    plan: BuildPlan,
    progress: Arc<dyn ProgressHandler>,
    tracker: Mutex<StageTracker>,
}

impl BuildSession {
    pub fn new(plan: BuildPlan, progress: Arc<dyn ProgressHandler>) -> Self {
        Self {
            id: Uuid::new_v4(),
            plan,
            progress,
            tracker: Mutex::new(StageTracker {
                machine: StateMachine::new(),
                completed: 0,
                current: None,
                output: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn plan(&self) -> &BuildPlan {
        &self.plan
    }

    pub fn state(&self) -> BuildState {
        self.tracker().machine.state()
    }

    pub fn history(&self) -> Vec<BuildState> {
        self.tracker().machine.history().to_vec()
    }

    /// Submit the plan to `engine`. The tag exists only if every step succeeded.
    pub async fn run(
        &self,
        engine: &dyn BuildEngine,
        context_dir: &Path,
        tag: &str,
    ) -> Result<BuiltImage, BuildError> {
        let state = self.state();
        if state != BuildState::Pending {
            return Err(BuildError::InvalidTransition {
                from: state,
                to: BuildState::BaseReady,
            });
        }

        let fingerprint = self.plan.fingerprint();
        let request = BuildRequest {
            dockerfile: self.plan.render_dockerfile(),
            context_dir: context_dir.to_path_buf(),
            tag: tag.to_string(),
            labels: HashMap::from([(FINGERPRINT_LABEL.to_string(), fingerprint.clone())]),
        };

        self.progress.on_progress(&ProgressEvent::BuildStarted {
            session_id: self.id.to_string(),
            tag: tag.to_string(),
            engine: engine.name().to_string(),
            steps: self.plan.len(),
        });
        info!(session = %self.id, tag, engine = engine.name(), "Build session started");

        let started = Instant::now();
        let observer = SessionObserver { session: self };
        match engine.build(&request, &observer).await {
            Ok(id) => {
                self.complete_through(self.plan.len());
                let duration = started.elapsed();
                let state = self.state();
                if state != BuildState::ImageComplete {
                    self.tracker().machine.fail();
                    return Err(BuildError::InvalidTransition {
                        from: state,
                        to: BuildState::ImageComplete,
                    });
                }

                self.progress.on_progress(&ProgressEvent::BuildCompleted {
                    image_id: id.clone(),
                    tag: tag.to_string(),
                    duration,
                });
                Ok(BuiltImage {
                    id,
                    tag: tag.to_string(),
                    fingerprint,
                    duration,
                    finished_at: Utc::now(),
                })
            }
            Err(e) => {
                let error = self.classify(e);
                self.tracker().machine.fail();
                warn!(session = %self.id, error = %error, "Build session failed");
                self.progress.on_progress(&ProgressEvent::BuildFailed {
                    stage: error.stage(),
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    fn tracker(&self) -> MutexGuard<'_, StageTracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn classify(&self, error: EngineError) -> BuildError {
        match error {
            EngineError::StepFailed { step, message } => {
                let tracker = self.tracker();
                let index = step
                    .and_then(|s| s.checked_sub(1))
                    .filter(|i| *i < self.plan.len())
                    .or(tracker.current);
                let stage = index
                    .map(|i| self.plan.steps[i].stage)
                    .unwrap_or(Stage::Base);

                let mut lines = tracker.output.clone();
                lines.push(message);
                BuildError::StageFailed {
                    stage,
                    message: lines.join("\n"),
                }
            }
            other => BuildError::Engine(other),
        }
    }

    fn on_step_started(&self, index: usize, total: usize, instruction: String) {
        if total != self.plan.len() {
            debug!(total, planned = self.plan.len(), "Engine step count differs from plan");
        }
        let Some(position) = index.checked_sub(1).filter(|i| *i < self.plan.len()) else {
            return;
        };

        self.complete_through(position);

        let stage = self.plan.steps[position].stage;
        let new_stage = position == 0 || self.plan.steps[position - 1].stage != stage;
        {
            let mut tracker = self.tracker();
            tracker.current = Some(position);
            tracker.output.clear();
        }

        if new_stage {
            self.progress.on_progress(&ProgressEvent::StageStarted { stage });
        }
        self.progress.on_progress(&ProgressEvent::StepStarted {
            index,
            total,
            instruction,
        });
    }

    fn on_output(&self, line: String) {
        self.tracker().output.push(line.clone());
        self.progress
            .on_progress(&ProgressEvent::EngineOutput { line });
    }

    /// Apply the states of every plan step before `end`
    fn complete_through(&self, end: usize) {
        let mut reached = Vec::new();
        {
            let mut tracker = self.tracker();
            while tracker.completed < end {
                let step = &self.plan.steps[tracker.completed];
                for state in &step.reaches {
                    if let Err(e) = tracker.machine.advance(*state) {
                        warn!(error = %e, "Ignoring out-of-order stage completion");
                        continue;
                    }
                    reached.push((step.stage, *state));
                }
                tracker.completed += 1;
            }
        }

        for (stage, state) in reached {
            self.progress
                .on_progress(&ProgressEvent::StageCompleted { stage, state });
        }
    }
}

struct SessionObserver<'a> {
    session: &'a BuildSession,
}

impl EngineObserver for SessionObserver<'_> {
    fn on_event(&self, event: EngineEvent) {
        match event {
            EngineEvent::StepStarted {
                index,
                total,
                instruction,
            } => self.session.on_step_started(index, total, instruction),
            EngineEvent::Output(line) => self.session.on_output(line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ImageBuilder, PlanOnlyEngine};
    use crate::launcher::RuntimeContract;
    use crate::progress::NoOpHandler;
    use async_trait::async_trait;

    fn plan() -> BuildPlan {
        let mut builder = ImageBuilder::new();
        builder
            .select_base("python:3.11-slim")
            .unwrap()
            .install_system_packages(&["gcc"])
            .unwrap()
            .copy_source(".", "/app")
            .unwrap()
            .install_app_dependencies("requirements.txt")
            .unwrap();
        builder
            .finish(RuntimeContract {
                port: 8080,
                command: vec!["python".into(), "main.py".into()],
            })
            .unwrap()
    }

    /// Reports steps up to `fail_at` (1-based) and fails there
    struct FailingEngine {
        fail_at: usize,
    }

    #[async_trait]
    impl BuildEngine for FailingEngine {
        fn name(&self) -> &str {
            "failing"
        }

        async fn build(
            &self,
            request: &BuildRequest,
            observer: &dyn EngineObserver,
        ) -> Result<String, EngineError> {
            let lines: Vec<&str> = request.dockerfile.lines().collect();
            for (i, line) in lines.iter().enumerate().take(self.fail_at) {
                observer.on_event(EngineEvent::StepStarted {
                    index: i + 1,
                    total: lines.len(),
                    instruction: line.to_string(),
                });
            }
            observer.on_event(EngineEvent::Output("step output".to_string()));
            Err(EngineError::StepFailed {
                step: Some(self.fail_at),
                message: "exit code 1".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_plan_only_run_completes() {
        let session = BuildSession::new(plan(), Arc::new(NoOpHandler));
        let image = session
            .run(&PlanOnlyEngine, Path::new("."), "app:test")
            .await
            .unwrap();

        assert_eq!(session.state(), BuildState::ImageComplete);
        assert_eq!(
            session.history(),
            vec![
                BuildState::Pending,
                BuildState::BaseReady,
                BuildState::SystemDepsReady,
                BuildState::SourceCopied,
                BuildState::AppDepsReady,
                BuildState::ImageComplete,
            ]
        );
        assert_eq!(image.tag, "app:test");
        assert_eq!(image.fingerprint, session.plan().fingerprint());
    }

    #[tokio::test]
    async fn test_failure_maps_to_stage() {
        let session = BuildSession::new(plan(), Arc::new(NoOpHandler));
        let err = session
            .run(&FailingEngine { fail_at: 2 }, Path::new("."), "app:test")
            .await
            .unwrap_err();

        match err {
            BuildError::StageFailed { stage, message } => {
                assert_eq!(stage, Stage::SystemDependencies);
                assert_eq!(message, "step output\nexit code 1");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(session.state(), BuildState::Failed);
        assert_eq!(
            session.history(),
            vec![BuildState::Pending, BuildState::BaseReady, BuildState::Failed]
        );
    }

    #[tokio::test]
    async fn test_session_runs_once() {
        let session = BuildSession::new(plan(), Arc::new(NoOpHandler));
        session
            .run(&PlanOnlyEngine, Path::new("."), "app:test")
            .await
            .unwrap();
        let err = session
            .run(&PlanOnlyEngine, Path::new("."), "app:test")
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidTransition { .. }));
    }
}
