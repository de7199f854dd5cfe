//! Typed model of the container build descriptor

pub mod directive;
pub mod image_ref;
pub mod schema;

pub use directive::{parse_dockerfile, render_dockerfile, Directive, DockerfileError};
pub use image_ref::{ImageReference, ReferenceError};
pub use schema::{
    DependencySpec, DescriptorError, DescriptorMetadata, ImageDescriptor, RuntimeSpec, SourceSpec,
    SystemStage, DEFAULT_MANIFEST, DEFAULT_PORT, DEFAULT_SOURCE_DIR,
};
