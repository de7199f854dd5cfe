//! Resolve the application file and command-line bind port from an entrypoint

use crate::fs::FileSystem;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryTarget {
    /// `python main.py`
    Script(PathBuf),
    /// `python -m package`
    Module(String),
    /// WSGI/ASGI server hosting `module:app`
    Server {
        server: String,
        app: String,
        bind_port: Option<u16>,
        /// Address set by a config file or a socket the command line does not spell out
        external_bind: bool,
    },
    Unknown,
}

/// Command-line options of a server, by how they consume their value
struct ServerFlags {
    name: &'static str,
    /// `HOST:PORT` addresses
    bind: &'static [&'static str],
    port: &'static [&'static str],
    config: &'static [&'static str],
    /// Remaining options that take a value
    valued: &'static [&'static str],
}

const SERVERS: &[ServerFlags] = &[
    ServerFlags {
        name: "gunicorn",
        bind: &["-b", "--bind"],
        port: &[],
        config: &["-c", "--config"],
        valued: &[
            "-w", "--workers", "-k", "--worker-class", "-t", "--timeout", "--threads",
            "--log-level", "--log-config", "--access-logfile", "--error-logfile", "--log-file",
            "-p", "--pid", "-u", "--user", "-g", "--group", "-n", "--name", "-e", "--env",
            "--chdir", "--pythonpath", "--backlog", "--keep-alive", "--graceful-timeout",
            "--max-requests", "--max-requests-jitter", "--worker-connections",
            "--forwarded-allow-ips", "--certfile", "--keyfile", "--umask", "--worker-tmp-dir",
        ],
    },
    ServerFlags {
        name: "uvicorn",
        bind: &[],
        port: &["--port"],
        config: &["--uds", "--fd"],
        valued: &[
            "--host", "--workers", "--loop", "--http", "--ws", "--lifespan", "--interface",
            "--log-level", "--log-config", "--env-file", "--app-dir", "--root-path",
            "--reload-dir", "--reload-include", "--reload-exclude", "--timeout-keep-alive",
            "--limit-concurrency", "--limit-max-requests", "--backlog", "--forwarded-allow-ips",
            "--ssl-keyfile", "--ssl-certfile", "--header", "--ws-max-size",
        ],
    },
    ServerFlags {
        name: "hypercorn",
        bind: &["-b", "--bind"],
        port: &[],
        config: &["-c", "--config"],
        valued: &[
            "-w", "--workers", "-k", "--worker-class", "--log-level", "--log-config",
            "--access-logfile", "--error-logfile", "--root-path", "--keyfile", "--certfile",
            "--graceful-timeout", "--backlog", "-p", "--pid", "-u", "--user", "-g", "--group",
            "--insecure-bind", "--quic-bind",
        ],
    },
    ServerFlags {
        name: "waitress-serve",
        bind: &["--listen"],
        port: &["--port"],
        config: &["--unix-socket"],
        valued: &["--host", "--threads", "--url-scheme", "--url-prefix", "--ident", "--backlog"],
    },
    ServerFlags {
        name: "daphne",
        bind: &[],
        port: &["-p", "--port"],
        config: &["-u", "--unix-socket", "--fd", "-e", "--endpoint"],
        valued: &[
            "-b", "--bind", "--access-log", "-v", "--verbosity", "--root-path", "-t",
            "--http-timeout", "--proxy-headers-host", "--proxy-headers-port",
            "--application-close-timeout", "--ping-interval", "--ping-timeout",
        ],
    },
];

fn server_flags(name: &str) -> Option<&'static ServerFlags> {
    SERVERS.iter().find(|s| s.name == name)
}

pub struct EntrypointResolver;

impl EntrypointResolver {
    pub fn resolve(command: &[String]) -> EntryTarget {
        let argv = unwrap_shell(command);
        let Some(program) = argv.first() else {
            return EntryTarget::Unknown;
        };
        let program_name = basename(program);

        if is_python(program_name) {
            return resolve_python_args(&argv[1..]);
        }

        if let Some(flags) = server_flags(program_name) {
            return resolve_server(flags, &argv[1..]);
        }

        // `./main.py` style with a shebang
        if program.ends_with(".py") {
            return EntryTarget::Script(PathBuf::from(program));
        }

        EntryTarget::Unknown
    }

    /// Candidate source files for a target, relative to the working directory
    pub fn candidate_files(target: &EntryTarget) -> Vec<PathBuf> {
        match target {
            EntryTarget::Script(path) => vec![path.clone()],
            EntryTarget::Module(module) => {
                let base = PathBuf::from(module.replace('.', "/"));
                vec![base.with_extension("py"), base.join("__main__.py")]
            }
            EntryTarget::Server { app, .. } => {
                let module = app.split(':').next().unwrap_or(app);
                let base = PathBuf::from(module.replace('.', "/"));
                vec![base.with_extension("py"), base.join("__init__.py")]
            }
            EntryTarget::Unknown => Vec::new(),
        }
    }

    /// First candidate file present under `root`
    pub fn locate(fs: &dyn FileSystem, root: &Path, target: &EntryTarget) -> Option<PathBuf> {
        Self::candidate_files(target)
            .into_iter()
            .map(|candidate| root.join(candidate))
            .find(|path| fs.is_file(path))
    }
}

/// `sh -c "python main.py"` runs the inner command
fn unwrap_shell(command: &[String]) -> Vec<String> {
    match command {
        [shell, flag, script, ..]
            if matches!(basename(shell), "sh" | "bash" | "dash") && flag == "-c" =>
        {
            let inner = script.trim().strip_prefix("exec ").unwrap_or(script.trim());
            inner.split_whitespace().map(str::to_string).collect()
        }
        _ => command.to_vec(),
    }
}

fn basename(program: &str) -> &str {
    program.rsplit('/').next().unwrap_or(program)
}

fn is_python(program: &str) -> bool {
    program == "python"
        || program
            .strip_prefix("python")
            .is_some_and(|v| v.chars().all(|c| c.is_ascii_digit() || c == '.'))
}

fn resolve_python_args(args: &[String]) -> EntryTarget {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-m" => {
                let Some(module) = iter.next() else {
                    return EntryTarget::Unknown;
                };
                if let Some(flags) = server_flags(module) {
                    let rest: Vec<String> = iter.cloned().collect();
                    return resolve_server(flags, &rest);
                }
                return EntryTarget::Module(module.clone());
            }
            "-c" => return EntryTarget::Unknown,
            flag if flag.starts_with('-') => continue,
            script => return EntryTarget::Script(PathBuf::from(script)),
        }
    }
    EntryTarget::Unknown
}

fn resolve_server(flags: &ServerFlags, args: &[String]) -> EntryTarget {
    let mut app = None;
    let mut bind_port = None;
    let mut external_bind = false;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if arg.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };

        let is_bind = flags.bind.contains(&flag);
        let is_port = flags.port.contains(&flag);
        let is_config = flags.config.contains(&flag);
        if !(is_bind || is_port || is_config || flags.valued.contains(&flag)) {
            if !arg.starts_with('-') && app.is_none() {
                app = Some(arg.clone());
            }
            continue;
        }

        let Some(value) = inline.or_else(|| iter.next().cloned()) else {
            break;
        };
        if is_bind {
            match port_from_address(&value) {
                Some(port) => bind_port = Some(port),
                None => external_bind = true,
            }
        } else if is_port {
            bind_port = value.parse().ok();
        } else if is_config {
            external_bind = true;
        }
    }

    match app {
        Some(app) => EntryTarget::Server {
            server: flags.name.to_string(),
            app,
            bind_port,
            external_bind: external_bind && bind_port.is_none(),
        },
        None => EntryTarget::Unknown,
    }
}

fn port_from_address(address: &str) -> Option<u16> {
    address.rsplit(':').next()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;
    use yare::parameterized;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[parameterized(
        python = { &["python", "main.py"], "main.py" },
        python3 = { &["python3", "-u", "app.py"], "app.py" },
        absolute_interpreter = { &["/usr/local/bin/python3.11", "server.py"], "server.py" },
        shell_wrapped = { &["/bin/sh", "-c", "exec python main.py"], "main.py" },
        shebang = { &["./main.py"], "./main.py" },
    )]
    fn test_script_targets(command: &[&str], expected: &str) {
        assert_eq!(
            EntrypointResolver::resolve(&argv(command)),
            EntryTarget::Script(PathBuf::from(expected))
        );
    }

    #[test]
    fn test_module_target() {
        let target = EntrypointResolver::resolve(&argv(&["python", "-m", "app.web"]));
        assert_eq!(target, EntryTarget::Module("app.web".to_string()));
        assert_eq!(
            EntrypointResolver::candidate_files(&target),
            vec![PathBuf::from("app/web.py"), PathBuf::from("app/web/__main__.py")]
        );
    }

    #[test]
    fn test_gunicorn_bind() {
        let target = EntrypointResolver::resolve(&argv(&[
            "gunicorn", "-w", "2", "--bind", "0.0.0.0:8080", "main:app",
        ]));
        assert_eq!(
            target,
            EntryTarget::Server {
                server: "gunicorn".to_string(),
                app: "main:app".to_string(),
                bind_port: Some(8080),
                external_bind: false,
            }
        );
        assert_eq!(
            EntrypointResolver::candidate_files(&target)[0],
            PathBuf::from("main.py")
        );
    }

    #[test]
    fn test_uvicorn_via_python_module() {
        let target = EntrypointResolver::resolve(&argv(&[
            "python", "-m", "uvicorn", "api.main:app", "--host", "0.0.0.0", "--port=9000",
        ]));
        assert_eq!(
            target,
            EntryTarget::Server {
                server: "uvicorn".to_string(),
                app: "api.main:app".to_string(),
                bind_port: Some(9000),
                external_bind: false,
            }
        );
    }

    #[test]
    fn test_gunicorn_short_flags_take_values() {
        let target = EntrypointResolver::resolve(&argv(&[
            "gunicorn", "-p", "/tmp/app.pid", "--log-level", "info", "main:app",
        ]));
        assert_eq!(
            target,
            EntryTarget::Server {
                server: "gunicorn".to_string(),
                app: "main:app".to_string(),
                bind_port: None,
                external_bind: false,
            }
        );
    }

    #[test]
    fn test_gunicorn_config_file() {
        let target = EntrypointResolver::resolve(&argv(&[
            "gunicorn", "-c", "gunicorn.conf.py", "main:app",
        ]));
        assert_eq!(
            target,
            EntryTarget::Server {
                server: "gunicorn".to_string(),
                app: "main:app".to_string(),
                bind_port: None,
                external_bind: true,
            }
        );

        let target = EntrypointResolver::resolve(&argv(&[
            "gunicorn", "--config=gunicorn.conf.py", "--bind", "0.0.0.0:8080", "main:app",
        ]));
        assert!(matches!(
            target,
            EntryTarget::Server { bind_port: Some(8080), external_bind: false, .. }
        ));
    }

    #[parameterized(
        daphne_port = { &["daphne", "-b", "0.0.0.0", "-p", "8080", "proj.asgi:application"], Some(8080), false },
        waitress_inline = { &["waitress-serve", "--host=0.0.0.0", "--port=8080", "main:app"], Some(8080), false },
        unix_socket = { &["gunicorn", "--bind", "unix:/tmp/app.sock", "main:app"], None, true },
        uvicorn_default = { &["uvicorn", "main:app", "--host", "0.0.0.0"], None, false },
    )]
    fn test_server_bind_flags(command: &[&str], port: Option<u16>, external: bool) {
        match EntrypointResolver::resolve(&argv(command)) {
            EntryTarget::Server {
                bind_port,
                external_bind,
                ..
            } => {
                assert_eq!(bind_port, port);
                assert_eq!(external_bind, external);
            }
            other => panic!("Expected server target, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_targets() {
        assert_eq!(EntrypointResolver::resolve(&[]), EntryTarget::Unknown);
        assert_eq!(
            EntrypointResolver::resolve(&argv(&["python", "-c", "print(1)"])),
            EntryTarget::Unknown
        );
        assert_eq!(
            EntrypointResolver::resolve(&argv(&["node", "server.js"])),
            EntryTarget::Unknown
        );
    }

    #[test]
    fn test_locate_in_source_tree() {
        let fs = MockFileSystem::new();
        fs.add_file("app/web/__main__.py", "print('hi')");
        let target = EntryTarget::Module("app.web".to_string());
        assert_eq!(
            EntrypointResolver::locate(&fs, fs.root(), &target),
            Some(fs.root().join("app/web/__main__.py"))
        );
        assert_eq!(
            EntrypointResolver::locate(&fs, fs.root(), &EntryTarget::Script("main.py".into())),
            None
        );
    }
}
