//! Bind port extractor - deterministic extraction of the port an application
//! listens on, from its entrypoint and entry file

use super::entrypoint::{EntryTarget, EntrypointResolver};
use crate::fs::FileSystem;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

/// Where the application takes its listening port from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindPort {
    Literal(u16),
    Env { var: String, default: Option<u16> },
}

impl fmt::Display for BindPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindPort::Literal(port) => write!(f, "{}", port),
            BindPort::Env {
                var,
                default: Some(default),
            } => write!(f, "${} (default {})", var, default),
            BindPort::Env { var, default: None } => write!(f, "${}", var),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BindPortInfo {
    pub port: BindPort,
    pub source: PortSource,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSource {
    CommandLine,
    /// The server's own default when its command line names no port
    ServerDefault { server: String },
    CodePattern { file: PathBuf, pattern: String },
}

/// Port a server binds when its command line names none.
///
/// gunicorn binds `$PORT` when set; the others ignore the environment.
fn server_default_port(server: &str) -> Option<BindPort> {
    match server {
        "gunicorn" => Some(BindPort::Env {
            var: "PORT".to_string(),
            default: Some(8000),
        }),
        "uvicorn" | "hypercorn" | "daphne" => Some(BindPort::Literal(8000)),
        "waitress-serve" => Some(BindPort::Literal(8080)),
        _ => None,
    }
}

struct PortPattern {
    name: &'static str,
    regex: Regex,
    kind: PatternKind,
    confidence: f64,
}

#[derive(Clone, Copy)]
enum PatternKind {
    /// Captures: 1 = variable, 2 = default
    EnvWithDefault,
    /// Captures: 1 = variable
    Env,
    /// Captures: 1 = port
    Literal,
}

fn patterns() -> &'static [PortPattern] {
    static PATTERNS: OnceLock<Vec<PortPattern>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let build = |name, pattern: &str, kind, confidence| PortPattern {
            name,
            regex: Regex::new(pattern).expect("valid regex"),
            kind,
            confidence,
        };
        vec![
            build(
                "environ-get-default",
                r#"(?:os\.environ\.get|os\.getenv|environ\.get|getenv)\(\s*["']([A-Z0-9_]*PORT[A-Z0-9_]*)["']\s*,\s*["']?(\d{1,5})["']?\s*\)"#,
                PatternKind::EnvWithDefault,
                0.95,
            ),
            build(
                "environ-index",
                r#"(?:os\.environ|environ)\[\s*["']([A-Z0-9_]*PORT[A-Z0-9_]*)["']\s*\]"#,
                PatternKind::Env,
                0.9,
            ),
            build(
                "environ-get",
                r#"(?:os\.environ\.get|os\.getenv|environ\.get|getenv)\(\s*["']([A-Z0-9_]*PORT[A-Z0-9_]*)["']\s*\)"#,
                PatternKind::Env,
                0.85,
            ),
            build(
                "run-port-literal",
                r#"\.run\([^)]*?\bport\s*=\s*(\d{1,5})\b"#,
                PatternKind::Literal,
                0.9,
            ),
            build(
                "port-constant",
                r#"(?m)^PORT\s*=\s*(\d{1,5})\s*(?:#.*)?$"#,
                PatternKind::Literal,
                0.7,
            ),
        ]
    })
}

pub struct BindPortExtractor<F: FileSystem> {
    fs: F,
}

impl<F: FileSystem> BindPortExtractor<F> {
    pub fn new(fs: F) -> Self {
        Self { fs }
    }

    /// Resolve the bind port for `command` run from `source_root`.
    ///
    /// A server command is never resolved from application code: the server
    /// imports the app module, so its `__main__` block does not run.
    pub fn extract(&self, source_root: &Path, command: &[String]) -> Option<BindPortInfo> {
        let target = EntrypointResolver::resolve(command);

        if let EntryTarget::Server {
            server,
            bind_port,
            external_bind,
            ..
        } = &target
        {
            return self.extract_for_server(source_root, server, *bind_port, *external_bind);
        }

        let file = EntrypointResolver::locate(&self.fs, source_root, &target)?;
        self.extract_from_file(&file)
    }

    fn extract_for_server(
        &self,
        source_root: &Path,
        server: &str,
        bind_port: Option<u16>,
        external_bind: bool,
    ) -> Option<BindPortInfo> {
        if let Some(port) = bind_port {
            return Some(BindPortInfo {
                port: BindPort::Literal(port),
                source: PortSource::CommandLine,
                confidence: 1.0,
            });
        }

        // gunicorn loads ./gunicorn.conf.py on its own
        let implicit_config =
            server == "gunicorn" && self.fs.is_file(&source_root.join("gunicorn.conf.py"));
        if external_bind || implicit_config {
            debug!(server, "Bind address comes from outside the command line");
            return None;
        }

        let port = server_default_port(server)?;
        debug!(server, port = %port, "Server binds its default port");
        Some(BindPortInfo {
            port,
            source: PortSource::ServerDefault {
                server: server.to_string(),
            },
            confidence: 0.8,
        })
    }

    /// Highest-confidence match in `file`; earlier patterns win ties
    pub fn extract_from_file(&self, file: &Path) -> Option<BindPortInfo> {
        let content = match self.fs.read_to_string(file) {
            Ok(c) => c,
            Err(e) => {
                debug!(file = %file.display(), error = %e, "Unable to read entry file");
                return None;
            }
        };

        let mut best: Option<BindPortInfo> = None;
        for pattern in patterns() {
            let Some(info) = Self::match_pattern(pattern, &content, file) else {
                continue;
            };
            if best.as_ref().map_or(true, |b| info.confidence > b.confidence) {
                best = Some(info);
            }
        }

        if let Some(ref info) = best {
            debug!(file = %file.display(), port = %info.port, "Extracted bind port");
        }
        best
    }

    fn match_pattern(pattern: &PortPattern, content: &str, file: &Path) -> Option<BindPortInfo> {
        let caps = pattern
            .regex
            .captures_iter(content)
            .find(|caps| !is_commented(content, caps.get(0).map_or(0, |m| m.start())))?;

        let port = match pattern.kind {
            PatternKind::EnvWithDefault => BindPort::Env {
                var: caps.get(1)?.as_str().to_string(),
                default: caps.get(2)?.as_str().parse().ok().filter(|p| *p != 0),
            },
            PatternKind::Env => BindPort::Env {
                var: caps.get(1)?.as_str().to_string(),
                default: None,
            },
            PatternKind::Literal => match caps.get(1)?.as_str().parse::<u16>() {
                Ok(port) if port > 0 => BindPort::Literal(port),
                _ => return None,
            },
        };

        Some(BindPortInfo {
            port,
            source: PortSource::CodePattern {
                file: file.to_path_buf(),
                pattern: pattern.name.to_string(),
            },
            confidence: pattern.confidence,
        })
    }
}

fn is_commented(content: &str, offset: usize) -> bool {
    let line_start = content[..offset].rfind('\n').map_or(0, |i| i + 1);
    content[line_start..offset].trim_start().starts_with('#')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    const OBSERVED_APP: &str = r#"
import os
from flask import Flask

app = Flask(__name__)

@app.route("/health")
def health():
    return {"status": "ok"}

if __name__ == "__main__":
    app.run(host="0.0.0.0", port=int(os.environ.get("PORT", 8080)))
"#;

    fn command(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_observed_application() {
        let fs = MockFileSystem::new();
        fs.add_file("main.py", OBSERVED_APP);
        let root = fs.root().to_path_buf();

        let extractor = BindPortExtractor::new(&fs);
        let info = extractor
            .extract(&root, &command(&["python", "main.py"]))
            .unwrap();

        assert_eq!(
            info.port,
            BindPort::Env {
                var: "PORT".to_string(),
                default: Some(8080)
            }
        );
        assert!(matches!(info.source, PortSource::CodePattern { ref pattern, .. } if pattern == "environ-get-default"));
    }

    #[test]
    fn test_literal_run_port() {
        let fs = MockFileSystem::new();
        fs.add_file("app.py", "app.run(debug=False, port=5000)\n");
        let extractor = BindPortExtractor::new(&fs);
        let info = extractor
            .extract(fs.root(), &command(&["python", "app.py"]))
            .unwrap();
        assert_eq!(info.port, BindPort::Literal(5000));
    }

    #[test]
    fn test_getenv_with_string_default() {
        let fs = MockFileSystem::new();
        fs.add_file(
            "main.py",
            "port = int(os.getenv('APP_PORT', '9000'))\nserve(app, port=port)\n",
        );
        let extractor = BindPortExtractor::new(&fs);
        let info = extractor.extract_from_file(&fs.root().join("main.py")).unwrap();
        assert_eq!(
            info.port,
            BindPort::Env {
                var: "APP_PORT".to_string(),
                default: Some(9000)
            }
        );
    }

    #[test]
    fn test_environ_index_without_default() {
        let fs = MockFileSystem::new();
        fs.add_file("main.py", "port = int(os.environ[\"PORT\"])\n");
        let extractor = BindPortExtractor::new(&fs);
        let info = extractor.extract_from_file(&fs.root().join("main.py")).unwrap();
        assert_eq!(
            info.port,
            BindPort::Env {
                var: "PORT".to_string(),
                default: None
            }
        );
    }

    #[test]
    fn test_env_default_beats_constant() {
        let fs = MockFileSystem::new();
        fs.add_file(
            "main.py",
            "PORT = 5000\napp.run(port=int(os.environ.get('PORT', 8080)))\n",
        );
        let extractor = BindPortExtractor::new(&fs);
        let info = extractor.extract_from_file(&fs.root().join("main.py")).unwrap();
        assert_eq!(
            info.port,
            BindPort::Env {
                var: "PORT".to_string(),
                default: Some(8080)
            }
        );
    }

    #[test]
    fn test_module_constant() {
        let fs = MockFileSystem::new();
        fs.add_file("main.py", "PORT = 8000  # listen\n");
        let extractor = BindPortExtractor::new(&fs);
        let info = extractor.extract_from_file(&fs.root().join("main.py")).unwrap();
        assert_eq!(info.port, BindPort::Literal(8000));
    }

    #[test]
    fn test_commented_code_ignored() {
        let fs = MockFileSystem::new();
        fs.add_file("main.py", "# app.run(port=5000)\nprint('no server')\n");
        let extractor = BindPortExtractor::new(&fs);
        assert!(extractor.extract_from_file(&fs.root().join("main.py")).is_none());
    }

    #[test]
    fn test_command_line_port_wins() {
        let fs = MockFileSystem::new();
        fs.add_file("main.py", OBSERVED_APP);
        let extractor = BindPortExtractor::new(&fs);
        let info = extractor
            .extract(
                fs.root(),
                &command(&["gunicorn", "--bind", "0.0.0.0:8080", "main:app"]),
            )
            .unwrap();
        assert_eq!(info.port, BindPort::Literal(8080));
        assert_eq!(info.source, PortSource::CommandLine);
    }

    #[test]
    fn test_server_ignores_main_block() {
        let fs = MockFileSystem::new();
        fs.add_file(
            "main.py",
            "import uvicorn\napp = FastAPI()\n\nif __name__ == \"__main__\":\n    uvicorn.run(app, host=\"0.0.0.0\", port=8080)\n",
        );
        let extractor = BindPortExtractor::new(&fs);
        let info = extractor
            .extract(fs.root(), &command(&["uvicorn", "main:app"]))
            .unwrap();
        assert_eq!(info.port, BindPort::Literal(8000));
        assert_eq!(
            info.source,
            PortSource::ServerDefault {
                server: "uvicorn".to_string()
            }
        );
    }

    #[test]
    fn test_gunicorn_default_reads_port_variable() {
        let fs = MockFileSystem::new();
        fs.add_file("main.py", OBSERVED_APP);
        let extractor = BindPortExtractor::new(&fs);
        let info = extractor
            .extract(fs.root(), &command(&["gunicorn", "main:app"]))
            .unwrap();
        assert_eq!(
            info.port,
            BindPort::Env {
                var: "PORT".to_string(),
                default: Some(8000)
            }
        );

        fs.add_file("gunicorn.conf.py", "bind = \"0.0.0.0:8080\"\n");
        assert!(extractor
            .extract(fs.root(), &command(&["gunicorn", "main:app"]))
            .is_none());
        assert!(extractor
            .extract(fs.root(), &command(&["gunicorn", "-c", "prod.py", "main:app"]))
            .is_none());
    }

    #[test]
    fn test_missing_entry_file() {
        let fs = MockFileSystem::new();
        let extractor = BindPortExtractor::new(&fs);
        assert!(extractor
            .extract(fs.root(), &command(&["python", "main.py"]))
            .is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(BindPort::Literal(8080).to_string(), "8080");
        assert_eq!(
            BindPort::Env {
                var: "PORT".into(),
                default: Some(8080)
            }
            .to_string(),
            "$PORT (default 8080)"
        );
    }
}
