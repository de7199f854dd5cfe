//! Image builder
//!
//! Declaration ([`ImageBuilder`] producing a [`BuildPlan`]) is separate from
//! execution ([`BuildSession`] driving a [`BuildEngine`]). Both share the same
//! [`BuildState`] progression.

pub mod docker;
pub mod engine;
pub mod error;
pub mod plan;
pub mod session;
pub mod state;

pub use docker::{package_context, DockerEngine, DOCKERFILE_NAME};
pub use engine::{
    parse_step_line, BuildEngine, BuildRequest, EngineError, EngineEvent, EngineObserver,
    PlanOnlyEngine,
};
pub use error::BuildError;
pub use plan::{BuildOptions, BuildPlan, ImageBuilder, PlannedStep};
pub use session::{BuildSession, BuiltImage, FINGERPRINT_LABEL};
pub use state::{BuildState, Stage, StateMachine};
