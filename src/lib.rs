//! runpack - build descriptors for HTTP services on managed container platforms
//!
//! A descriptor captures the four ordered stages of a Python service image:
//! base runtime selection, system dependency installation, application
//! dependency installation and the runtime entrypoint (port and command).
//!
//! # Example Usage
//!
//! ```no_run
//! use runpack::builder::{BuildSession, DockerEngine};
//! use runpack::descriptor::ImageDescriptor;
//! use runpack::progress::LoggingHandler;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn build() -> anyhow::Result<()> {
//! let descriptor = ImageDescriptor::load(Path::new("runpack.yaml"))?;
//! let session = BuildSession::new(descriptor.plan()?, Arc::new(LoggingHandler));
//! let image = session
//!     .run(&DockerEngine::connect()?, Path::new("."), "myapp:1.0")
//!     .await?;
//! println!("{} ({})", image.tag, image.id);
//! # Ok(())
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`descriptor`]: the typed descriptor, Dockerfile rendering and import
//! - [`builder`]: stage state machine, build plans and engines
//! - [`launcher`]: runtime contract and the container probe
//! - [`validation`]: rules run before anything is built
//! - [`extractors`]: static detection of the port the application binds

pub mod builder;
pub mod cli;
pub mod config;
pub mod descriptor;
pub mod extractors;
pub mod fs;
pub mod launcher;
pub mod manifest;
pub mod progress;
pub mod scaffold;
pub mod util;
pub mod validation;

pub use builder::{BuildError, BuildPlan, BuildSession, BuildState, BuiltImage, ImageBuilder, Stage};
pub use config::{ConfigError, RunpackConfig};
pub use descriptor::ImageDescriptor;
pub use launcher::{RuntimeContract, RuntimeLauncher};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};
pub use validation::{ValidationReport, Validator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
