//! Docker engine backend using the daemon's classic builder through bollard

use super::engine::{parse_step_line, BuildEngine, BuildRequest, EngineError, EngineEvent, EngineObserver};
use async_trait::async_trait;
use bollard::image::BuildImageOptions;
use bollard::Docker;
use bytes::Bytes;
use futures_util::stream::StreamExt;
use std::path::Path;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Name the rendered Dockerfile gets inside the build context archive
pub const DOCKERFILE_NAME: &str = ".runpack.Dockerfile";

pub struct DockerEngine {
    docker: Docker,
    no_cache: bool,
}

impl DockerEngine {
    pub fn new(docker: Docker) -> Self {
        Self {
            docker,
            no_cache: false,
        }
    }

    /// Connect using `DOCKER_HOST` or the platform's default socket
    pub fn connect() -> Result<Self, EngineError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        Ok(Self::new(docker))
    }

    /// Disable the daemon's layer cache for this engine's builds
    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Unavailable(e.to_string()))
    }

    async fn resolve_image_id(&self, tag: &str) -> Result<String, EngineError> {
        let inspect = self
            .docker
            .inspect_image(tag)
            .await
            .map_err(|e| EngineError::Unavailable(e.to_string()))?;
        inspect.id.ok_or_else(|| EngineError::StepFailed {
            step: None,
            message: format!("engine reported no image id for {}", tag),
        })
    }
}

/// Archive the whole context directory plus the rendered Dockerfile.
///
/// Entries are added in file-name order with the Dockerfile last so identical
/// trees produce identical archives.
pub fn package_context(context_dir: &Path, dockerfile: &str) -> Result<Vec<u8>, EngineError> {
    let context_err = |e: std::io::Error| EngineError::Context(e.to_string());

    if !context_dir.is_dir() {
        return Err(EngineError::Context(format!(
            "{} is not a directory",
            context_dir.display()
        )));
    }

    let mut archive = tar::Builder::new(Vec::new());
    archive.follow_symlinks(false);

    for entry in WalkDir::new(context_dir)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| EngineError::Context(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(context_dir)
            .map_err(|e| EngineError::Context(e.to_string()))?;
        if relative == Path::new(DOCKERFILE_NAME) {
            continue;
        }
        archive
            .append_path_with_name(entry.path(), relative)
            .map_err(context_err)?;
    }

    let mut header = tar::Header::new_gnu();
    header.set_size(dockerfile.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    archive
        .append_data(&mut header, DOCKERFILE_NAME, dockerfile.as_bytes())
        .map_err(context_err)?;

    archive.into_inner().map_err(context_err)
}

#[async_trait]
impl BuildEngine for DockerEngine {
    fn name(&self) -> &str {
        "docker"
    }

    async fn build(
        &self,
        request: &BuildRequest,
        observer: &dyn EngineObserver,
    ) -> Result<String, EngineError> {
        let context = package_context(&request.context_dir, &request.dockerfile)?;
        debug!(bytes = context.len(), context = %request.context_dir.display(), "Packaged build context");

        let options = BuildImageOptions {
            dockerfile: DOCKERFILE_NAME.to_string(),
            t: request.tag.clone(),
            nocache: self.no_cache,
            rm: true,
            forcerm: true,
            labels: request.labels.clone(),
            ..Default::default()
        };

        info!(tag = %request.tag, "Submitting build to Docker");
        let mut stream = self
            .docker
            .build_image(options, None, Some(Bytes::from(context)));

        let mut current_step: Option<usize> = None;
        let mut image_id: Option<String> = None;

        while let Some(item) = stream.next().await {
            let info = match item {
                Ok(info) => info,
                Err(bollard::errors::Error::DockerStreamError { error }) => {
                    return Err(EngineError::StepFailed {
                        step: current_step,
                        message: error,
                    });
                }
                Err(e) => return Err(EngineError::Unavailable(e.to_string())),
            };

            if let Some(text) = info.stream {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    match parse_step_line(line) {
                        Some(event) => {
                            if let EngineEvent::StepStarted { index, .. } = &event {
                                current_step = Some(*index);
                            }
                            observer.on_event(event);
                        }
                        None => observer.on_event(EngineEvent::Output(line.to_string())),
                    }
                }
            }

            if let Some(error) = info.error {
                return Err(EngineError::StepFailed {
                    step: current_step,
                    message: error,
                });
            }

            if let Some(id) = info.aux.and_then(|aux| aux.id) {
                image_id = Some(id);
            }
        }

        match image_id {
            Some(id) => Ok(id),
            None => self.resolve_image_id(&request.tag).await,
        }
    }
}
