//! Image builder declaration layer
//!
//! [`ImageBuilder`] exposes one operation per build stage. Each operation
//! validates its input, appends the stage's directives and advances the state
//! machine by one step; the first failure leaves the builder in `Failed`.

use super::error::BuildError;
use super::state::{BuildState, Stage, StateMachine};
use crate::descriptor::{render_dockerfile, Directive, ImageDescriptor, ImageReference};
use crate::launcher::RuntimeContract;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use tracing::debug;

const APT_LISTS: &str = "/var/lib/apt/lists/*";

fn package_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9+.\-]+(=[A-Za-z0-9.+:~\-]+)?$").expect("valid regex")
    })
}

fn path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._/\-]+$").expect("valid regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Remove the apt package index after installing system packages
    pub clean_cache: bool,
    /// Pass `--no-cache-dir` to pip
    pub no_cache: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            clean_cache: true,
            no_cache: true,
        }
    }
}

/// One directive and the build states reached once it completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    pub stage: Stage,
    #[serde(serialize_with = "serialize_directive")]
    pub directive: Directive,
    pub reaches: Vec<BuildState>,
}

fn serialize_directive<S: serde::Serializer>(d: &Directive, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&d.render())
}

/// Ordered, fully validated build steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    pub steps: Vec<PlannedStep>,
    pub contract: RuntimeContract,
}

impl BuildPlan {
    pub fn directives(&self) -> Vec<Directive> {
        self.steps.iter().map(|s| s.directive.clone()).collect()
    }

    pub fn render_dockerfile(&self) -> String {
        render_dockerfile(&self.directives())
    }

    /// SHA-256 hex digest of the rendered Dockerfile
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.render_dockerfile().as_bytes()))
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps belonging to `stage`, in order
    pub fn stage_steps(&self, stage: Stage) -> impl Iterator<Item = &PlannedStep> {
        self.steps.iter().filter(move |s| s.stage == stage)
    }
}

#[derive(Debug, Default)]
pub struct ImageBuilder {
    machine: StateMachine,
    options: BuildOptions,
    steps: Vec<PlannedStep>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: BuildOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Run the four declaration stages from a descriptor
    pub fn from_descriptor(descriptor: &ImageDescriptor) -> Result<Self, BuildError> {
        let mut builder = Self::with_options(BuildOptions {
            clean_cache: descriptor.system.clean_cache,
            no_cache: descriptor.dependencies.no_cache,
        });
        builder
            .select_base(&descriptor.base)?
            .install_system_packages(&descriptor.system.packages)?
            .copy_source(&descriptor.source.from, &descriptor.source.to)?
            .install_app_dependencies(&descriptor.dependencies.manifest)?;
        Ok(builder)
    }

    pub fn state(&self) -> BuildState {
        self.machine.state()
    }

    pub fn history(&self) -> &[BuildState] {
        self.machine.history()
    }

    pub fn select_base(&mut self, reference: &str) -> Result<&mut Self, BuildError> {
        self.guarded(BuildState::Pending, |b| {
            let reference = ImageReference::parse(reference)?;
            if !reference.is_pinned() {
                return Err(BuildError::FloatingBase(reference.to_string()));
            }
            debug!(base = %reference, "Selected base image");
            b.push(Stage::Base, Directive::From(reference), &[BuildState::BaseReady]);
            b.machine.advance(BuildState::BaseReady)
        })
    }

    /// A single `RUN` covering index update, install and cleanup. An empty list
    /// emits nothing; the base directive then also completes this stage.
    pub fn install_system_packages<S: AsRef<str>>(
        &mut self,
        packages: &[S],
    ) -> Result<&mut Self, BuildError> {
        self.guarded(BuildState::BaseReady, |b| {
            for package in packages {
                let package = package.as_ref();
                if !package_re().is_match(package) {
                    return Err(BuildError::InvalidPackage(package.to_string()));
                }
            }

            if packages.is_empty() {
                if let Some(last) = b.steps.last_mut() {
                    last.reaches.push(BuildState::SystemDepsReady);
                }
            } else {
                let names: Vec<&str> = packages.iter().map(|p| p.as_ref()).collect();
                let mut command = format!(
                    "apt-get update && apt-get install -y --no-install-recommends {}",
                    names.join(" ")
                );
                if b.options.clean_cache {
                    command.push_str(&format!(" && rm -rf {}", APT_LISTS));
                }
                debug!(packages = %names.join(" "), "Declared system packages");
                b.push(
                    Stage::SystemDependencies,
                    Directive::Run(command),
                    &[BuildState::SystemDepsReady],
                );
            }
            b.machine.advance(BuildState::SystemDepsReady)
        })
    }

    /// Copies the whole source tree into `dest`, which becomes the working
    /// directory. The copy is unconditional.
    pub fn copy_source(&mut self, src: &str, dest: &str) -> Result<&mut Self, BuildError> {
        self.guarded(BuildState::SystemDepsReady, |b| {
            if src.trim().is_empty() {
                return Err(BuildError::InvalidSourcePath("source cannot be empty".into()));
            }
            if !dest.starts_with('/') {
                return Err(BuildError::InvalidSourcePath(format!(
                    "destination '{}' must be absolute",
                    dest
                )));
            }
            b.push(Stage::Source, Directive::Workdir(dest.to_string()), &[]);
            b.push(
                Stage::Source,
                Directive::Copy {
                    from: src.to_string(),
                    to: ".".to_string(),
                },
                &[BuildState::SourceCopied],
            );
            b.machine.advance(BuildState::SourceCopied)
        })
    }

    pub fn install_app_dependencies(&mut self, manifest: &str) -> Result<&mut Self, BuildError> {
        self.guarded(BuildState::SourceCopied, |b| {
            if manifest.starts_with('/') || !path_re().is_match(manifest) {
                return Err(BuildError::InvalidManifestPath(manifest.to_string()));
            }
            let command = if b.options.no_cache {
                format!("pip install --no-cache-dir -r {}", manifest)
            } else {
                format!("pip install -r {}", manifest)
            };
            b.push(
                Stage::AppDependencies,
                Directive::Run(command),
                &[BuildState::AppDepsReady],
            );
            b.machine.advance(BuildState::AppDepsReady)
        })
    }

    /// Append the runtime contract and hand back the complete plan. The builder
    /// itself stays in `AppDepsReady`; `ImageComplete` is reached only when an
    /// engine runs the plan.
    pub fn finish(&mut self, contract: RuntimeContract) -> Result<BuildPlan, BuildError> {
        if self.state() != BuildState::AppDepsReady {
            let from = self.state();
            self.machine.fail();
            return Err(BuildError::InvalidTransition {
                from,
                to: BuildState::ImageComplete,
            });
        }

        let mut steps = self.steps.clone();
        let directives = contract.directives();
        let last = directives.len().saturating_sub(1);
        for (i, directive) in directives.into_iter().enumerate() {
            let reaches = if i == last {
                vec![BuildState::ImageComplete]
            } else {
                Vec::new()
            };
            steps.push(PlannedStep {
                stage: Stage::Runtime,
                directive,
                reaches,
            });
        }

        Ok(BuildPlan { steps, contract })
    }

    fn push(&mut self, stage: Stage, directive: Directive, reaches: &[BuildState]) {
        self.steps.push(PlannedStep {
            stage,
            directive,
            reaches: reaches.to_vec(),
        });
    }

    /// Runs `op` only from `expected`; any error fails the builder
    fn guarded<F>(&mut self, expected: BuildState, op: F) -> Result<&mut Self, BuildError>
    where
        F: FnOnce(&mut Self) -> Result<(), BuildError>,
    {
        let current = self.state();
        if current != expected {
            self.machine.fail();
            return Err(BuildError::InvalidTransition {
                from: current,
                to: expected.next().unwrap_or(BuildState::Failed),
            });
        }

        let checkpoint = self.steps.len();
        match op(self) {
            Ok(()) => Ok(self),
            Err(e) => {
                self.steps.truncate(checkpoint);
                self.machine.fail();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> RuntimeContract {
        RuntimeContract {
            port: 8080,
            command: vec!["python".into(), "main.py".into()],
        }
    }

    fn full_builder() -> ImageBuilder {
        let mut builder = ImageBuilder::new();
        builder
            .select_base("python:3.11-slim")
            .unwrap()
            .install_system_packages(&["gcc", "g++"])
            .unwrap()
            .copy_source(".", "/app")
            .unwrap()
            .install_app_dependencies("requirements.txt")
            .unwrap();
        builder
    }

    #[test]
    fn test_operations_advance_state() {
        let mut builder = ImageBuilder::new();
        assert_eq!(builder.state(), BuildState::Pending);
        builder.select_base("python:3.11-slim").unwrap();
        assert_eq!(builder.state(), BuildState::BaseReady);
        builder.install_system_packages(&["gcc"]).unwrap();
        assert_eq!(builder.state(), BuildState::SystemDepsReady);
        builder.copy_source(".", "/app").unwrap();
        assert_eq!(builder.state(), BuildState::SourceCopied);
        builder.install_app_dependencies("requirements.txt").unwrap();
        assert_eq!(builder.state(), BuildState::AppDepsReady);
    }

    #[test]
    fn test_plan_steps_and_states() {
        let plan = full_builder().finish(contract()).unwrap();
        let stages: Vec<Stage> = plan.steps.iter().map(|s| s.stage).collect();
        assert_eq!(
            stages,
            vec![
                Stage::Base,
                Stage::SystemDependencies,
                Stage::Source,
                Stage::Source,
                Stage::AppDependencies,
                Stage::Runtime,
                Stage::Runtime,
            ]
        );
        assert_eq!(plan.steps[0].reaches, vec![BuildState::BaseReady]);
        assert_eq!(plan.steps[6].reaches, vec![BuildState::ImageComplete]);
        assert_eq!(plan.stage_steps(Stage::Source).count(), 2);
    }

    #[test]
    fn test_system_packages_single_run_with_cleanup() {
        let plan = full_builder().finish(contract()).unwrap();
        assert_eq!(
            plan.steps[1].directive,
            Directive::Run(
                "apt-get update && apt-get install -y --no-install-recommends gcc g++ && rm -rf /var/lib/apt/lists/*"
                    .to_string()
            )
        );
    }

    #[test]
    fn test_empty_system_packages_emit_nothing() {
        let mut builder = ImageBuilder::new();
        let none: [&str; 0] = [];
        builder
            .select_base("python:3.11-slim")
            .unwrap()
            .install_system_packages(&none)
            .unwrap();
        assert_eq!(builder.state(), BuildState::SystemDepsReady);
        assert_eq!(builder.steps.len(), 1);
        assert_eq!(
            builder.steps[0].reaches,
            vec![BuildState::BaseReady, BuildState::SystemDepsReady]
        );
    }

    #[test]
    fn test_floating_base_fails_builder() {
        let mut builder = ImageBuilder::new();
        let err = builder.select_base("python:latest").unwrap_err();
        assert!(matches!(err, BuildError::FloatingBase(_)));
        assert_eq!(builder.state(), BuildState::Failed);

        let err = builder.install_system_packages(&["gcc"]).unwrap_err();
        assert!(matches!(err, BuildError::InvalidTransition { .. }));
    }

    #[test]
    fn test_invalid_package_rejected() {
        let mut builder = ImageBuilder::new();
        builder.select_base("python:3.11-slim").unwrap();
        let err = builder
            .install_system_packages(&["gcc", "curl; rm -rf /"])
            .unwrap_err();
        assert!(matches!(err, BuildError::InvalidPackage(p) if p == "curl; rm -rf /"));
        assert_eq!(builder.state(), BuildState::Failed);
        assert_eq!(builder.steps.len(), 1);
    }

    #[test]
    fn test_dependencies_must_follow_copy() {
        let mut builder = ImageBuilder::new();
        builder
            .select_base("python:3.11-slim")
            .unwrap()
            .install_system_packages(&["gcc"])
            .unwrap();
        let err = builder
            .install_app_dependencies("requirements.txt")
            .unwrap_err();
        assert!(matches!(
            err,
            BuildError::InvalidTransition {
                from: BuildState::SystemDepsReady,
                ..
            }
        ));
    }

    #[test]
    fn test_copy_requires_absolute_destination() {
        let mut builder = ImageBuilder::new();
        builder
            .select_base("python:3.11-slim")
            .unwrap()
            .install_system_packages(&["gcc"])
            .unwrap();
        assert!(matches!(
            builder.copy_source(".", "app").unwrap_err(),
            BuildError::InvalidSourcePath(_)
        ));
    }

    #[test]
    fn test_manifest_path_rejected() {
        let mut builder = ImageBuilder::new();
        builder
            .select_base("python:3.11-slim")
            .unwrap()
            .install_system_packages(&["gcc"])
            .unwrap()
            .copy_source(".", "/app")
            .unwrap();
        assert!(matches!(
            builder.install_app_dependencies("reqs.txt && curl x").unwrap_err(),
            BuildError::InvalidManifestPath(_)
        ));
    }

    #[test]
    fn test_pip_cache_flag_follows_options() {
        let mut builder = ImageBuilder::with_options(BuildOptions {
            clean_cache: true,
            no_cache: false,
        });
        builder
            .select_base("python:3.11-slim")
            .unwrap()
            .install_system_packages(&["gcc"])
            .unwrap()
            .copy_source(".", "/app")
            .unwrap()
            .install_app_dependencies("requirements.txt")
            .unwrap();
        let plan = builder.finish(contract()).unwrap();
        assert_eq!(
            plan.steps[4].directive,
            Directive::Run("pip install -r requirements.txt".to_string())
        );
    }

    #[test]
    fn test_finish_requires_dependencies() {
        let mut builder = ImageBuilder::new();
        builder.select_base("python:3.11-slim").unwrap();
        assert!(builder.finish(contract()).is_err());
        assert_eq!(builder.state(), BuildState::Failed);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = full_builder().finish(contract()).unwrap();
        let b = full_builder().finish(contract()).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.render_dockerfile(), b.render_dockerfile());
    }
}
