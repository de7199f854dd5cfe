//! ImageDescriptor schema data structures
//!
//! The descriptor is the declarative form of the four build stages: base
//! runtime, system packages, source copy plus application dependencies, and the
//! runtime contract. It is stored as YAML or JSON next to the application.

use super::directive::Directive;
use crate::builder::{BuildError, BuildPlan, ImageBuilder};
use crate::launcher::{LaunchError, RuntimeContract, RuntimeLauncher};
use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_MANIFEST: &str = "requirements.txt";
pub const DEFAULT_SOURCE_DIR: &str = "/app";

fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_null_default_version<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_else(default_version))
}

fn deserialize_null_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or(true))
}

fn default_version() -> String {
    "1.0".to_string()
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Dockerfile has no FROM instruction")]
    MissingBase,

    #[error("multiple FROM instructions are not supported")]
    MultipleBases,

    #[error("{0} instruction is out of order for a single-stage application image")]
    OutOfOrder(&'static str),

    #[error("unrecognized RUN command: {0}")]
    UnrecognizedRun(String),

    #[error("COPY destination '{0}' must be '.' or the working directory")]
    CopyDestination(String),

    #[error("Dockerfile never copies the source tree")]
    MissingSource,

    #[error("Dockerfile never installs application dependencies")]
    MissingDependencyInstall,

    #[error("Dockerfile exposes no port")]
    MissingPort,

    #[error("Dockerfile exposes more than one port: {0:?}")]
    MultiplePorts(Vec<u16>),

    #[error("Dockerfile declares no CMD")]
    MissingCommand,
}

/// Complete build descriptor for one application image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageDescriptor {
    /// Schema version (e.g., "1.0")
    #[serde(default = "default_version", deserialize_with = "deserialize_null_default_version")]
    pub version: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub metadata: DescriptorMetadata,
    /// Base image reference (e.g., "python:3.11-slim")
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub base: String,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub system: SystemStage,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub source: SourceSpec,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub dependencies: DependencySpec,
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub runtime: RuntimeSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DescriptorMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// OS-level packages installed on top of the base image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemStage {
    #[serde(deserialize_with = "deserialize_null_default")]
    pub packages: Vec<String>,
    /// Remove the package index after installing
    #[serde(deserialize_with = "deserialize_null_true")]
    pub clean_cache: bool,
}

impl Default for SystemStage {
    fn default() -> Self {
        Self {
            packages: Vec::new(),
            clean_cache: true,
        }
    }
}

/// Source tree copy; `to` doubles as the working directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSpec {
    #[serde(deserialize_with = "deserialize_null_default")]
    pub from: String,
    #[serde(deserialize_with = "deserialize_null_default")]
    pub to: String,
}

impl Default for SourceSpec {
    fn default() -> Self {
        Self {
            from: ".".to_string(),
            to: DEFAULT_SOURCE_DIR.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DependencySpec {
    /// Manifest path relative to the working directory
    #[serde(deserialize_with = "deserialize_null_default")]
    pub manifest: String,
    /// Install without keeping the package manager's download cache
    #[serde(deserialize_with = "deserialize_null_true")]
    pub no_cache: bool,
}

impl Default for DependencySpec {
    fn default() -> Self {
        Self {
            manifest: DEFAULT_MANIFEST.to_string(),
            no_cache: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSpec {
    #[serde(deserialize_with = "deserialize_null_default")]
    pub port: u16,
    #[serde(deserialize_with = "deserialize_null_default")]
    pub command: Vec<String>,
}

impl Default for RuntimeSpec {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            command: Vec::new(),
        }
    }
}

impl Default for ImageDescriptor {
    fn default() -> Self {
        Self {
            version: default_version(),
            metadata: DescriptorMetadata::default(),
            base: String::new(),
            system: SystemStage::default(),
            source: SourceSpec::default(),
            dependencies: DependencySpec::default(),
            runtime: RuntimeSpec::default(),
        }
    }
}

impl fmt::Display for ImageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Image Descriptor (v{})", self.version)?;
        writeln!(f, "========================")?;
        if let Some(ref name) = self.metadata.name {
            writeln!(f, "Name:        {}", name)?;
        }
        if let Some(ref description) = self.metadata.description {
            writeln!(f, "Description: {}", description)?;
        }
        writeln!(f, "Base Image:  {}", self.base)?;
        writeln!(f)?;

        writeln!(f, "System Dependencies:")?;
        if self.system.packages.is_empty() {
            writeln!(f, "  (none)")?;
        } else {
            writeln!(f, "  Packages:    {}", self.system.packages.join(", "))?;
        }
        writeln!(f, "  Clean cache: {}", yes_no(self.system.clean_cache))?;
        writeln!(f)?;

        writeln!(f, "Application:")?;
        writeln!(f, "  Source:   {} -> {}", self.source.from, self.source.to)?;
        writeln!(f, "  Manifest: {}", self.dependencies.manifest)?;
        writeln!(f, "  No cache: {}", yes_no(self.dependencies.no_cache))?;
        writeln!(f)?;

        writeln!(f, "Runtime:")?;
        writeln!(f, "  Port:    {}", self.runtime.port)?;
        writeln!(f, "  Command: {}", self.runtime.command.join(" "))?;

        Ok(())
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

impl ImageDescriptor {
    /// Load a descriptor from disk; `.json` files are read as JSON, anything
    /// else as YAML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read descriptor {}", path.display()))?;

        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let parsed = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        };
        parsed.with_context(|| format!("Invalid descriptor {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse descriptor YAML")
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse descriptor JSON")
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize descriptor to YAML")
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize descriptor to JSON")
    }

    pub fn contract(&self) -> Result<RuntimeContract, LaunchError> {
        let mut launcher = RuntimeLauncher::new();
        launcher.declare_port(self.runtime.port)?;
        let (command, args) = self
            .runtime
            .command
            .split_first()
            .ok_or(LaunchError::EmptyCommand)?;
        launcher.declare_entrypoint(command, args)?;
        launcher.contract()
    }

    /// Run every builder operation in stage order
    pub fn plan(&self) -> Result<BuildPlan, BuildError> {
        let contract = self.contract()?;
        let mut builder = ImageBuilder::from_descriptor(self)?;
        builder.finish(contract)
    }

    pub fn render_dockerfile(&self) -> Result<String, BuildError> {
        Ok(self.plan()?.render_dockerfile())
    }

    /// SHA-256 of the rendered Dockerfile
    pub fn fingerprint(&self) -> Result<String, BuildError> {
        Ok(self.plan()?.fingerprint())
    }

    /// Reconstruct a descriptor from a Dockerfile laid out in stage order:
    /// `FROM`, optional apt `RUN`, `WORKDIR` + `COPY`, pip `RUN`, `EXPOSE`, `CMD`.
    pub fn from_directives(directives: &[Directive]) -> Result<Self, DescriptorError> {
        let mut descriptor = Self {
            system: SystemStage {
                packages: Vec::new(),
                clean_cache: false,
            },
            dependencies: DependencySpec {
                manifest: String::new(),
                no_cache: false,
            },
            ..Self::default()
        };

        let mut phase = ImportPhase::Base;
        let mut workdir: Option<String> = None;
        let mut ports = Vec::new();
        let mut command: Option<Vec<String>> = None;

        for directive in directives {
            match (phase, directive) {
                (ImportPhase::Base, Directive::From(reference)) => {
                    descriptor.base = reference.to_string();
                    phase = ImportPhase::System;
                }
                (ImportPhase::Base, _) => return Err(DescriptorError::MissingBase),
                (_, Directive::From(_)) => return Err(DescriptorError::MultipleBases),
                (ImportPhase::System, Directive::Run(cmd)) => {
                    parse_apt_run(cmd, &mut descriptor.system)?;
                }
                (ImportPhase::System, Directive::Workdir(dir)) => {
                    workdir = Some(dir.clone());
                    phase = ImportPhase::Copy;
                }
                (ImportPhase::System, Directive::Copy { from, to }) if to.starts_with('/') => {
                    descriptor.source = SourceSpec {
                        from: from.clone(),
                        to: to.clone(),
                    };
                    phase = ImportPhase::Dependencies;
                }
                (ImportPhase::Copy, Directive::Copy { from, to }) => {
                    let dir = workdir.clone().unwrap_or_default();
                    if to != "." && to != "./" && *to != dir && *to != format!("{}/", dir) {
                        return Err(DescriptorError::CopyDestination(to.clone()));
                    }
                    descriptor.source = SourceSpec {
                        from: from.clone(),
                        to: dir,
                    };
                    phase = ImportPhase::Dependencies;
                }
                (ImportPhase::Dependencies, Directive::Run(cmd)) => {
                    parse_pip_run(cmd, &mut descriptor.dependencies)?;
                    phase = ImportPhase::Runtime;
                }
                (ImportPhase::Runtime, Directive::Expose(port)) => ports.push(*port),
                (ImportPhase::Runtime, Directive::Cmd(argv)) => command = Some(argv.clone()),
                (_, other) => return Err(DescriptorError::OutOfOrder(other.keyword())),
            }
        }

        match phase {
            ImportPhase::Base => return Err(DescriptorError::MissingBase),
            ImportPhase::System | ImportPhase::Copy => return Err(DescriptorError::MissingSource),
            ImportPhase::Dependencies => return Err(DescriptorError::MissingDependencyInstall),
            ImportPhase::Runtime => {}
        }

        // nothing to clean without an apt step
        if descriptor.system.packages.is_empty() {
            descriptor.system.clean_cache = true;
        }

        descriptor.runtime.port = match ports.as_slice() {
            [] => return Err(DescriptorError::MissingPort),
            [port] => *port,
            _ => return Err(DescriptorError::MultiplePorts(ports)),
        };
        descriptor.runtime.command = command.ok_or(DescriptorError::MissingCommand)?;

        Ok(descriptor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ImportPhase {
    Base,
    System,
    Copy,
    Dependencies,
    Runtime,
}

fn parse_apt_run(cmd: &str, system: &mut SystemStage) -> Result<(), DescriptorError> {
    for segment in cmd.split("&&").map(str::trim) {
        let tokens: Vec<&str> = segment.split_whitespace().collect();
        match tokens.as_slice() {
            ["apt-get", "update", ..] => {}
            ["apt-get", "install", rest @ ..] => {
                system
                    .packages
                    .extend(rest.iter().filter(|t| !t.starts_with('-')).map(|t| t.to_string()));
            }
            ["apt-get", "clean"] => system.clean_cache = true,
            ["rm", "-rf", paths @ ..] if paths.iter().all(|p| p.starts_with("/var/lib/apt/lists")) => {
                system.clean_cache = true;
            }
            _ => return Err(DescriptorError::UnrecognizedRun(cmd.to_string())),
        }
    }
    Ok(())
}

fn parse_pip_run(cmd: &str, deps: &mut DependencySpec) -> Result<(), DescriptorError> {
    let tokens: Vec<&str> = cmd.split_whitespace().collect();
    let args = match tokens.as_slice() {
        ["pip" | "pip3", "install", rest @ ..] => rest,
        ["python" | "python3", "-m", "pip", "install", rest @ ..] => rest,
        _ => return Err(DescriptorError::UnrecognizedRun(cmd.to_string())),
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "--no-cache-dir" => deps.no_cache = true,
            "-r" | "--requirement" => match iter.next() {
                Some(path) => deps.manifest = path.to_string(),
                None => return Err(DescriptorError::UnrecognizedRun(cmd.to_string())),
            },
            _ => return Err(DescriptorError::UnrecognizedRun(cmd.to_string())),
        }
    }

    if deps.manifest.is_empty() {
        return Err(DescriptorError::UnrecognizedRun(cmd.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::parse_dockerfile;
    use tempfile::TempDir;

    fn create_minimal_valid_descriptor() -> ImageDescriptor {
        ImageDescriptor {
            base: "python:3.11-slim".to_string(),
            system: SystemStage {
                packages: vec!["gcc".to_string(), "g++".to_string()],
                clean_cache: true,
            },
            runtime: RuntimeSpec {
                port: 8080,
                command: vec!["python".to_string(), "main.py".to_string()],
            },
            ..ImageDescriptor::default()
        }
    }

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let yaml = "base: python:3.11-slim\nruntime:\n  command: [python, main.py]\n";
        let descriptor = ImageDescriptor::from_yaml_str(yaml).unwrap();
        assert_eq!(descriptor.version, "1.0");
        assert_eq!(descriptor.source.from, ".");
        assert_eq!(descriptor.source.to, "/app");
        assert_eq!(descriptor.dependencies.manifest, "requirements.txt");
        assert!(descriptor.dependencies.no_cache);
        assert!(descriptor.system.clean_cache);
        assert_eq!(descriptor.runtime.port, 8080);
    }

    #[test]
    fn test_null_fields_use_defaults() {
        let json = r#"{"version": null, "base": "python:3.11-slim", "system": {"packages": null, "clean_cache": null}, "runtime": {"port": 8080, "command": ["python", "main.py"]}}"#;
        let descriptor = ImageDescriptor::from_json_str(json).unwrap();
        assert_eq!(descriptor.version, "1.0");
        assert!(descriptor.system.packages.is_empty());
        assert!(descriptor.system.clean_cache);
    }

    #[test]
    fn test_yaml_json_agree() {
        let descriptor = create_minimal_valid_descriptor();
        let from_yaml = ImageDescriptor::from_yaml_str(&descriptor.to_yaml().unwrap()).unwrap();
        let from_json = ImageDescriptor::from_json_str(&descriptor.to_json().unwrap()).unwrap();
        assert_eq!(from_yaml, descriptor);
        assert_eq!(from_json, descriptor);
    }

    #[test]
    fn test_load_picks_format_by_extension() {
        let dir = TempDir::new().unwrap();
        let descriptor = create_minimal_valid_descriptor();

        let json_path = dir.path().join("runpack.json");
        std::fs::write(&json_path, descriptor.to_json().unwrap()).unwrap();
        assert_eq!(ImageDescriptor::load(&json_path).unwrap(), descriptor);

        let yaml_path = dir.path().join("runpack.yaml");
        std::fs::write(&yaml_path, descriptor.to_yaml().unwrap()).unwrap();
        assert_eq!(ImageDescriptor::load(&yaml_path).unwrap(), descriptor);
    }

    #[test]
    fn test_load_missing_file_has_context() {
        let err = ImageDescriptor::load(Path::new("/nonexistent/runpack.yaml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read descriptor"));
    }

    #[test]
    fn test_render_matches_observed_layout() {
        let dockerfile = create_minimal_valid_descriptor().render_dockerfile().unwrap();
        let expected = "FROM python:3.11-slim\n\
RUN apt-get update && apt-get install -y --no-install-recommends gcc g++ && rm -rf /var/lib/apt/lists/*\n\
WORKDIR /app\n\
COPY . .\n\
RUN pip install --no-cache-dir -r requirements.txt\n\
EXPOSE 8080\n\
CMD [\"python\", \"main.py\"]\n";
        assert_eq!(dockerfile, expected);
    }

    #[test]
    fn test_fingerprint_is_reproducible() {
        let a = create_minimal_valid_descriptor();
        let b = create_minimal_valid_descriptor();
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
        assert_eq!(a.fingerprint().unwrap().len(), 64);

        let mut c = create_minimal_valid_descriptor();
        c.runtime.port = 9090;
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }

    #[test]
    fn test_cache_cleanup_only_changes_cleanup_command() {
        let with_cleanup = create_minimal_valid_descriptor().render_dockerfile().unwrap();
        let mut descriptor = create_minimal_valid_descriptor();
        descriptor.system.clean_cache = false;
        let without_cleanup = descriptor.render_dockerfile().unwrap();

        let changed: Vec<(&str, &str)> = with_cleanup
            .lines()
            .zip(without_cleanup.lines())
            .filter(|(a, b)| a != b)
            .collect();
        assert_eq!(changed.len(), 1);
        let (a, b) = changed[0];
        assert_eq!(a.replace(" && rm -rf /var/lib/apt/lists/*", ""), b);
    }

    #[test]
    fn test_from_directives_round_trip() {
        let descriptor = create_minimal_valid_descriptor();
        let dockerfile = descriptor.render_dockerfile().unwrap();
        let directives = parse_dockerfile(&dockerfile).unwrap();
        let imported = ImageDescriptor::from_directives(&directives).unwrap();
        assert_eq!(imported, descriptor);
    }

    #[test]
    fn test_from_directives_copy_to_absolute_path() {
        let text = "FROM python:3.12-slim\nCOPY . /srv\nRUN pip3 install -r deps.txt\nEXPOSE 8080\nCMD [\"python\", \"app.py\"]\n";
        let imported = ImageDescriptor::from_directives(&parse_dockerfile(text).unwrap()).unwrap();
        assert_eq!(imported.source.to, "/srv");
        assert_eq!(imported.dependencies.manifest, "deps.txt");
        assert!(!imported.dependencies.no_cache);
        assert!(imported.system.packages.is_empty());
    }

    #[test]
    fn test_from_directives_errors() {
        let parse = |text: &str| ImageDescriptor::from_directives(&parse_dockerfile(text).unwrap());

        assert_eq!(parse("WORKDIR /app"), Err(DescriptorError::MissingBase));
        assert_eq!(
            parse("FROM python:3.11\nRUN make\n"),
            Err(DescriptorError::UnrecognizedRun("make".to_string()))
        );
        assert_eq!(
            parse("FROM python:3.11\nWORKDIR /app\nCOPY . .\n"),
            Err(DescriptorError::MissingDependencyInstall)
        );
        assert_eq!(
            parse("FROM python:3.11\nWORKDIR /app\nCOPY . .\nRUN pip install -r requirements.txt\nCMD [\"python\", \"main.py\"]\n"),
            Err(DescriptorError::MissingPort)
        );
        assert_eq!(
            parse("FROM python:3.11\nWORKDIR /app\nCOPY . .\nRUN pip install -r requirements.txt\nEXPOSE 8080 9090\nCMD [\"python\", \"main.py\"]\n"),
            Err(DescriptorError::MultiplePorts(vec![8080, 9090]))
        );
        assert_eq!(
            parse("FROM python:3.11\nEXPOSE 8080\n"),
            Err(DescriptorError::OutOfOrder("EXPOSE"))
        );
    }

    #[test]
    fn test_display_summary() {
        let output = create_minimal_valid_descriptor().to_string();
        assert!(output.contains("Base Image:  python:3.11-slim"));
        assert!(output.contains("Packages:    gcc, g++"));
        assert!(output.contains("Port:    8080"));
        assert!(output.contains("Command: python main.py"));
    }
}
