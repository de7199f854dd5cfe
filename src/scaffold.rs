//! Descriptor scaffolding for an existing Python HTTP application
//!
//! Reads the application directory and proposes a descriptor that follows the
//! platform conventions: slim Python base, a C toolchain for native
//! extensions, the full source tree copied to `/app`, `requirements.txt`
//! installed without cache and the entry script run on the platform port.

use crate::config::RunpackConfig;
use crate::descriptor::{
    DependencySpec, DescriptorMetadata, ImageDescriptor, RuntimeSpec, SourceSpec, SystemStage,
    DEFAULT_MANIFEST,
};
use crate::extractors::{BindPort, BindPortExtractor};
use crate::fs::FileSystem;
use crate::manifest::{normalize_name, DependencyManifest};
use anyhow::{bail, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

const DEFAULT_PYTHON_VERSION: &str = "3.11";

const ENTRY_CANDIDATES: &[&str] = &["main.py", "app.py", "server.py", "wsgi.py"];

/// Packages whose wheels commonly build C++ sources when no binary wheel matches
const CXX_PACKAGES: &[&str] = &["grpcio", "numpy", "pandas", "scipy", "shapely", "pyproj"];

pub struct Scaffolder;

impl Scaffolder {
    pub fn detect(fs: &dyn FileSystem, root: &Path, config: &RunpackConfig) -> Result<ImageDescriptor> {
        if !fs.is_dir(root) {
            bail!("Application directory not found: {}", root.display());
        }

        let python = detect_python_version(fs, root);
        debug!(version = %python, "Selected Python version");

        let manifest = match DependencyManifest::load(fs, &root.join(DEFAULT_MANIFEST)) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, "No usable {}; dependency install will fail until it exists", DEFAULT_MANIFEST);
                DependencyManifest::default()
            }
        };

        let Some(entry) = detect_entry_file(fs, root) else {
            bail!(
                "No entry script found in {} (looked for {})",
                root.display(),
                ENTRY_CANDIDATES.join(", ")
            );
        };
        let command = vec!["python".to_string(), entry.to_string()];

        let port = detect_port(fs, root, &command, config);

        let descriptor = ImageDescriptor {
            metadata: DescriptorMetadata {
                name: root
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned()),
                description: None,
            },
            base: format!("python:{}-slim", python),
            system: SystemStage {
                packages: system_packages(&manifest),
                clean_cache: true,
            },
            source: SourceSpec::default(),
            dependencies: DependencySpec::default(),
            runtime: RuntimeSpec { port, command },
            ..ImageDescriptor::default()
        };

        info!(
            base = %descriptor.base,
            entry = entry,
            port = port,
            "Scaffolded descriptor"
        );
        Ok(descriptor)
    }
}

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\.(\d+)").expect("valid regex"))
}

/// `major.minor` from the first version-looking token in `text`
fn major_minor(text: &str) -> Option<String> {
    let caps = version_re().captures(text)?;
    Some(format!("{}.{}", caps.get(1)?.as_str(), caps.get(2)?.as_str()))
}

fn detect_python_version(fs: &dyn FileSystem, root: &Path) -> String {
    // runtime.txt: python-3.11.4
    if let Ok(content) = fs.read_to_string(&root.join("runtime.txt")) {
        if let Some(version) = content
            .lines()
            .map(str::trim)
            .find(|l| l.starts_with("python-"))
            .and_then(major_minor)
        {
            return version;
        }
    }

    if let Ok(content) = fs.read_to_string(&root.join(".python-version")) {
        if let Some(version) = content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty() && !l.starts_with('#'))
            .and_then(major_minor)
        {
            return version;
        }
    }

    if let Ok(content) = fs.read_to_string(&root.join("pyproject.toml")) {
        match toml::from_str::<toml::Value>(&content) {
            Ok(parsed) => {
                if let Some(version) = parsed
                    .get("project")
                    .and_then(|p| p.get("requires-python"))
                    .and_then(|v| v.as_str())
                    .and_then(major_minor)
                {
                    return version;
                }
            }
            Err(e) => debug!(error = %e, "Ignoring unparseable pyproject.toml"),
        }
    }

    DEFAULT_PYTHON_VERSION.to_string()
}

/// First candidate with a `__main__` guard, else the first that exists
fn detect_entry_file(fs: &dyn FileSystem, root: &Path) -> Option<&'static str> {
    static MAIN_GUARD: OnceLock<Regex> = OnceLock::new();
    let guard = MAIN_GUARD.get_or_init(|| {
        Regex::new(r#"(?m)^if\s+__name__\s*==\s*['"]__main__['"]\s*:"#).expect("valid regex")
    });

    let present: Vec<&'static str> = ENTRY_CANDIDATES
        .iter()
        .copied()
        .filter(|name| fs.is_file(&root.join(name)))
        .collect();

    present
        .iter()
        .copied()
        .find(|name| {
            fs.read_to_string(&root.join(name))
                .map(|content| guard.is_match(&content))
                .unwrap_or(false)
        })
        .or_else(|| present.first().copied())
}

fn detect_port(fs: &dyn FileSystem, root: &Path, command: &[String], config: &RunpackConfig) -> u16 {
    let extractor = BindPortExtractor::new(fs);
    match extractor.extract(root, command).map(|info| info.port) {
        Some(BindPort::Literal(port)) => port,
        // The platform injects its port through this variable
        Some(BindPort::Env { var, .. }) if var == config.port_env_var => config.platform_port,
        Some(BindPort::Env {
            default: Some(default),
            ..
        }) => default,
        _ => config.platform_port,
    }
}

fn system_packages(manifest: &DependencyManifest) -> Vec<String> {
    let mut packages = vec!["gcc".to_string()];
    let needs_cxx = manifest
        .requirements
        .iter()
        .any(|r| CXX_PACKAGES.contains(&normalize_name(&r.name).as_str()));
    if needs_cxx {
        packages.push("g++".to_string());
    }
    packages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;
    use yare::parameterized;

    fn config() -> RunpackConfig {
        RunpackConfig {
            platform_port: 8080,
            port_env_var: "PORT".to_string(),
            strict_ports: false,
            startup_timeout_secs: 30,
            log_level: "info".to_string(),
        }
    }

    const FLASK_MAIN: &str = r#"import os
from flask import Flask

app = Flask(__name__)

if __name__ == "__main__":
    app.run(host="0.0.0.0", port=int(os.environ.get("PORT", 8080)))
"#;

    #[test]
    fn test_scaffold_flask_app() {
        let fs = MockFileSystem::new();
        fs.add_file("main.py", FLASK_MAIN);
        fs.add_file("requirements.txt", "flask==3.0.0\n");

        let descriptor = Scaffolder::detect(&fs, fs.root(), &config()).unwrap();
        assert_eq!(descriptor.base, "python:3.11-slim");
        assert_eq!(descriptor.system.packages, vec!["gcc"]);
        assert_eq!(descriptor.source.to, "/app");
        assert_eq!(descriptor.dependencies.manifest, "requirements.txt");
        assert_eq!(descriptor.runtime.port, 8080);
        assert_eq!(descriptor.runtime.command, vec!["python", "main.py"]);
        assert!(descriptor.plan().is_ok());
    }

    #[parameterized(
        runtime_txt = { "runtime.txt", "python-3.12.1\n", "3.12" },
        python_version = { ".python-version", "3.10.13\n", "3.10" },
        pyproject = { "pyproject.toml", "[project]\nname = \"svc\"\nrequires-python = \">=3.9\"\n", "3.9" },
        garbage = { ".python-version", "system\n", "3.11" },
    )]
    fn test_python_version_sources(file: &str, content: &str, expected: &str) {
        let fs = MockFileSystem::new();
        fs.add_file(file, content);
        assert_eq!(detect_python_version(&fs, fs.root()), expected);
    }

    #[test]
    fn test_entry_prefers_main_guard() {
        let fs = MockFileSystem::new();
        fs.add_file("main.py", "from app import app\n");
        fs.add_file("app.py", "app = 1\n\nif __name__ == '__main__':\n    run()\n");
        assert_eq!(detect_entry_file(&fs, fs.root()), Some("app.py"));
    }

    #[test]
    fn test_entry_falls_back_to_first_present() {
        let fs = MockFileSystem::new();
        fs.add_file("wsgi.py", "application = make()\n");
        fs.add_file("server.py", "serve()\n");
        assert_eq!(detect_entry_file(&fs, fs.root()), Some("server.py"));
    }

    #[test]
    fn test_cxx_toolchain_for_native_packages() {
        let fs = MockFileSystem::new();
        fs.add_file("main.py", FLASK_MAIN);
        fs.add_file("requirements.txt", "flask\nNumPy>=1.26\n");
        let descriptor = Scaffolder::detect(&fs, fs.root(), &config()).unwrap();
        assert_eq!(descriptor.system.packages, vec!["gcc", "g++"]);
    }

    #[test]
    fn test_literal_port_is_declared() {
        let fs = MockFileSystem::new();
        fs.add_file("main.py", "app.run(host='0.0.0.0', port=5000)\n");
        fs.add_file("requirements.txt", "flask\n");
        let descriptor = Scaffolder::detect(&fs, fs.root(), &config()).unwrap();
        assert_eq!(descriptor.runtime.port, 5000);
    }

    #[test]
    fn test_missing_manifest_still_scaffolds() {
        let fs = MockFileSystem::new();
        fs.add_file("main.py", FLASK_MAIN);
        let descriptor = Scaffolder::detect(&fs, fs.root(), &config()).unwrap();
        assert_eq!(descriptor.system.packages, vec!["gcc"]);
    }

    #[test]
    fn test_no_entry_script() {
        let fs = MockFileSystem::new();
        fs.add_file("requirements.txt", "flask\n");
        let err = Scaffolder::detect(&fs, fs.root(), &config()).unwrap_err();
        assert!(err.to_string().contains("No entry script"));
    }
}
