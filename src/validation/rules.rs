use crate::descriptor::{ImageDescriptor, ImageReference};
use crate::extractors::{BindPort, BindPortExtractor, EntryTarget, EntrypointResolver};
use crate::fs::FileSystem;
use crate::manifest::DependencyManifest;
use anyhow::Result;
use std::path::{Path, PathBuf};

/// Everything a rule may consult besides the descriptor itself
pub struct ValidationContext<'a> {
    pub fs: &'a dyn FileSystem,
    /// Build context directory; rules that inspect sources skip when unset
    pub source_root: Option<PathBuf>,
    /// Port the hosting platform routes traffic to
    pub platform_port: Option<u16>,
    /// Variable the platform injects the port through
    pub port_env_var: String,
    /// Treat an undeterminable bind port as an error
    pub strict_ports: bool,
}

impl<'a> ValidationContext<'a> {
    pub fn new(fs: &'a dyn FileSystem) -> Self {
        Self {
            fs,
            source_root: None,
            platform_port: None,
            port_env_var: "PORT".to_string(),
            strict_ports: false,
        }
    }

    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = Some(root.into());
        self
    }

    pub fn with_platform_port(mut self, port: u16) -> Self {
        self.platform_port = Some(port);
        self
    }

    pub fn with_port_env_var(mut self, var: impl Into<String>) -> Self {
        self.port_env_var = var.into();
        self
    }

    pub fn with_strict_ports(mut self, strict: bool) -> Self {
        self.strict_ports = strict;
        self
    }

    /// Host directory whose contents land in the image working directory
    fn app_root(&self, descriptor: &ImageDescriptor) -> Option<PathBuf> {
        self.source_root
            .as_ref()
            .map(|root| root.join(&descriptor.source.from))
    }
}

/// A rule returns warnings on success and fails with its first error
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, descriptor: &ImageDescriptor, ctx: &ValidationContext) -> Result<Vec<String>>;
}

pub struct RequiredFieldsRule;

impl ValidationRule for RequiredFieldsRule {
    fn name(&self) -> &'static str {
        "RequiredFields"
    }

    fn validate(&self, descriptor: &ImageDescriptor, _ctx: &ValidationContext) -> Result<Vec<String>> {
        if descriptor.version.is_empty() {
            anyhow::bail!("Version cannot be empty");
        }
        if descriptor.base.is_empty() {
            anyhow::bail!("Base image cannot be empty");
        }
        if descriptor.source.from.is_empty() {
            anyhow::bail!("Source path cannot be empty");
        }
        if descriptor.source.to.is_empty() {
            anyhow::bail!("Source destination cannot be empty");
        }
        if descriptor.dependencies.manifest.is_empty() {
            anyhow::bail!("Dependency manifest cannot be empty");
        }
        if descriptor.runtime.command.is_empty() {
            anyhow::bail!("Runtime command cannot be empty");
        }
        Ok(Vec::new())
    }
}

pub struct PinnedBaseRule;

impl ValidationRule for PinnedBaseRule {
    fn name(&self) -> &'static str {
        "PinnedBase"
    }

    fn validate(&self, descriptor: &ImageDescriptor, _ctx: &ValidationContext) -> Result<Vec<String>> {
        let reference = ImageReference::parse(&descriptor.base)?;
        if !reference.is_pinned() {
            anyhow::bail!(
                "Base image '{}' is floating; pin an explicit tag or digest",
                reference
            );
        }
        let mut warnings = Vec::new();
        if reference.digest().is_none() {
            warnings.push(format!(
                "Base image '{}' is pinned by tag only; the tag can move between builds",
                reference
            ));
        }
        Ok(warnings)
    }
}

pub struct PortRangeRule;

impl ValidationRule for PortRangeRule {
    fn name(&self) -> &'static str {
        "PortRange"
    }

    fn validate(&self, descriptor: &ImageDescriptor, ctx: &ValidationContext) -> Result<Vec<String>> {
        let port = descriptor.runtime.port;
        if port == 0 {
            anyhow::bail!("Runtime port cannot be 0");
        }
        if let Some(platform_port) = ctx.platform_port {
            if port != platform_port {
                anyhow::bail!(
                    "Declared port {} does not match the platform port {}",
                    port,
                    platform_port
                );
            }
        }
        Ok(Vec::new())
    }
}

/// Runs every builder operation so invalid packages or paths surface early
pub struct BuildPlanRule;

impl ValidationRule for BuildPlanRule {
    fn name(&self) -> &'static str {
        "BuildPlan"
    }

    fn validate(&self, descriptor: &ImageDescriptor, _ctx: &ValidationContext) -> Result<Vec<String>> {
        descriptor.plan()?;
        Ok(Vec::new())
    }
}

pub struct EntrypointExistsRule;

impl ValidationRule for EntrypointExistsRule {
    fn name(&self) -> &'static str {
        "EntrypointExists"
    }

    fn validate(&self, descriptor: &ImageDescriptor, ctx: &ValidationContext) -> Result<Vec<String>> {
        let Some(root) = ctx.app_root(descriptor) else {
            return Ok(Vec::new());
        };

        let command = relative_to_workdir(&descriptor.runtime.command, &descriptor.source.to);
        let target = EntrypointResolver::resolve(&command);
        if target == EntryTarget::Unknown {
            return Ok(vec![format!(
                "Cannot determine the application file from '{}'",
                descriptor.runtime.command.join(" ")
            )]);
        }

        if EntrypointResolver::locate(ctx.fs, &root, &target).is_none() {
            let candidates: Vec<String> = EntrypointResolver::candidate_files(&target)
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            anyhow::bail!(
                "Entry file not found in source tree (looked for {})",
                candidates.join(", ")
            );
        }
        Ok(Vec::new())
    }
}

pub struct ManifestRule;

impl ValidationRule for ManifestRule {
    fn name(&self) -> &'static str {
        "Manifest"
    }

    fn validate(&self, descriptor: &ImageDescriptor, ctx: &ValidationContext) -> Result<Vec<String>> {
        let Some(root) = ctx.app_root(descriptor) else {
            return Ok(Vec::new());
        };

        let manifest = DependencyManifest::load(ctx.fs, &root.join(&descriptor.dependencies.manifest))?;
        if let Some((name, lines)) = manifest.duplicates().into_iter().next() {
            let lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
            anyhow::bail!(
                "Package '{}' is listed more than once (lines {})",
                name,
                lines.join(", ")
            );
        }

        let mut warnings = Vec::new();
        if manifest.is_empty() && manifest.options.is_empty() {
            warnings.push(format!(
                "Dependency manifest {} lists no packages",
                descriptor.dependencies.manifest
            ));
        }
        Ok(warnings)
    }
}

/// The declared port must be the port the application binds
pub struct PortConsistencyRule;

impl ValidationRule for PortConsistencyRule {
    fn name(&self) -> &'static str {
        "PortConsistency"
    }

    fn validate(&self, descriptor: &ImageDescriptor, ctx: &ValidationContext) -> Result<Vec<String>> {
        let Some(root) = ctx.app_root(descriptor) else {
            return Ok(Vec::new());
        };

        let declared = descriptor.runtime.port;
        let command = relative_to_workdir(&descriptor.runtime.command, &descriptor.source.to);
        let extractor = BindPortExtractor::new(ctx.fs);

        let Some(info) = extractor.extract(&root, &command) else {
            let message = format!(
                "Cannot determine the port the application binds; declared port {} is unchecked",
                declared
            );
            if ctx.strict_ports {
                anyhow::bail!(message);
            }
            return Ok(vec![message]);
        };

        match info.port {
            BindPort::Literal(port) if port == declared => Ok(Vec::new()),
            BindPort::Literal(port) => anyhow::bail!(
                "Declared port {} but the application binds port {}",
                declared,
                port
            ),
            BindPort::Env { var, default } if var == ctx.port_env_var => match default {
                Some(default) if default != declared => Ok(vec![format!(
                    "Application reads ${} but falls back to {} when it is unset; declared port is {}",
                    var, default, declared
                )]),
                _ => Ok(Vec::new()),
            },
            BindPort::Env {
                var,
                default: Some(default),
            } if default == declared => Ok(vec![format!(
                "Application reads ${} instead of ${}; it binds {} only through its default",
                var, ctx.port_env_var, default
            )]),
            BindPort::Env { var, default } => {
                let fallback = default
                    .map(|d| format!("falls back to {}", d))
                    .unwrap_or_else(|| "has no default".to_string());
                anyhow::bail!(
                    "Declared port {} but the application reads ${} (not ${}) and {}",
                    declared,
                    var,
                    ctx.port_env_var,
                    fallback
                )
            }
        }
    }
}

/// Warns when cache cleanup is disabled; the image stays correct but larger
pub struct CacheCleanupRule;

impl ValidationRule for CacheCleanupRule {
    fn name(&self) -> &'static str {
        "CacheCleanup"
    }

    fn validate(&self, descriptor: &ImageDescriptor, _ctx: &ValidationContext) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        if !descriptor.system.clean_cache && !descriptor.system.packages.is_empty() {
            warnings.push("System package index is kept in the image".to_string());
        }
        if !descriptor.dependencies.no_cache {
            warnings.push("pip download cache is kept in the image".to_string());
        }
        Ok(warnings)
    }
}

/// Rewrite `/app/main.py` style arguments relative to the working directory
fn relative_to_workdir(command: &[String], workdir: &str) -> Vec<String> {
    let workdir = Path::new(workdir);
    command
        .iter()
        .map(|arg| match Path::new(arg).strip_prefix(workdir) {
            Ok(rel) if Path::new(arg).is_absolute() && !rel.as_os_str().is_empty() => {
                rel.display().to_string()
            }
            _ => arg.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_to_workdir() {
        let command = vec!["python".to_string(), "/app/src/main.py".to_string()];
        assert_eq!(
            relative_to_workdir(&command, "/app"),
            vec!["python".to_string(), "src/main.py".to_string()]
        );
        let other = vec!["python".to_string(), "/srv/main.py".to_string()];
        assert_eq!(relative_to_workdir(&other, "/app"), other);
    }
}
