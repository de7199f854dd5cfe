//! Build descriptor directives and their Dockerfile form
//!
//! A [`Directive`] is one instruction handed to the external image-building
//! engine. Rendering always yields exactly one Dockerfile instruction per
//! directive so engine step numbers map one-to-one onto directives.

use super::image_ref::{ImageReference, ReferenceError};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    From(ImageReference),
    Run(String),
    Workdir(String),
    Copy { from: String, to: String },
    Expose(u16),
    Cmd(Vec<String>),
}

#[derive(Debug, Error)]
pub enum DockerfileError {
    #[error("line {line}: unsupported instruction '{keyword}'")]
    Unsupported { line: usize, keyword: String },

    #[error("line {line}: {message}")]
    Invalid { line: usize, message: String },

    #[error("line {line}: invalid base image: {source}")]
    Reference {
        line: usize,
        #[source]
        source: ReferenceError,
    },
}

impl Directive {
    pub fn keyword(&self) -> &'static str {
        match self {
            Directive::From(_) => "FROM",
            Directive::Run(_) => "RUN",
            Directive::Workdir(_) => "WORKDIR",
            Directive::Copy { .. } => "COPY",
            Directive::Expose(_) => "EXPOSE",
            Directive::Cmd(_) => "CMD",
        }
    }

    pub fn render(&self) -> String {
        match self {
            Directive::From(reference) => format!("FROM {}", reference),
            Directive::Run(command) => format!("RUN {}", command),
            Directive::Workdir(dir) => format!("WORKDIR {}", dir),
            Directive::Copy { from, to } => {
                if from.contains(char::is_whitespace) || to.contains(char::is_whitespace) {
                    format!("COPY {}", json_array(&[from.clone(), to.clone()]))
                } else {
                    format!("COPY {} {}", from, to)
                }
            }
            Directive::Expose(port) => format!("EXPOSE {}", port),
            Directive::Cmd(argv) => format!("CMD {}", json_array(argv)),
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn json_array(items: &[String]) -> String {
    let quoted: Vec<String> = items
        .iter()
        .map(|item| Value::String(item.clone()).to_string())
        .collect();
    format!("[{}]", quoted.join(", "))
}

/// Render directives as a Dockerfile, one instruction per line
pub fn render_dockerfile(directives: &[Directive]) -> String {
    let mut out = String::new();
    for directive in directives {
        out.push_str(&directive.render());
        out.push('\n');
    }
    out
}

/// Parse a single-stage Dockerfile into directives
///
/// Only the instructions runpack itself emits are accepted. `ENTRYPOINT` is read
/// as the launch command when no `CMD` accompanies it.
pub fn parse_dockerfile(text: &str) -> Result<Vec<Directive>, DockerfileError> {
    let mut directives = Vec::new();
    let mut seen_entrypoint = false;
    let mut seen_cmd = false;

    for (line, instruction) in logical_lines(text) {
        let (keyword, args) = match instruction.split_once(char::is_whitespace) {
            Some((keyword, args)) => (keyword.to_ascii_uppercase(), args.trim()),
            None => (instruction.to_ascii_uppercase(), ""),
        };

        if args.is_empty() {
            return Err(DockerfileError::Invalid {
                line,
                message: format!("{} requires arguments", keyword),
            });
        }

        match keyword.as_str() {
            "FROM" => directives.push(parse_from(line, args)?),
            "RUN" => {
                let command = if args.starts_with('[') {
                    parse_exec_form(line, args)?.join(" ")
                } else {
                    args.to_string()
                };
                directives.push(Directive::Run(command));
            }
            "WORKDIR" => directives.push(Directive::Workdir(args.to_string())),
            "COPY" | "ADD" => directives.push(parse_copy(line, &keyword, args)?),
            "EXPOSE" => {
                for token in args.split_whitespace() {
                    directives.push(Directive::Expose(parse_port(line, token)?));
                }
            }
            "CMD" | "ENTRYPOINT" => {
                let is_cmd = keyword == "CMD";
                if (is_cmd && seen_entrypoint) || (!is_cmd && seen_cmd) {
                    return Err(DockerfileError::Invalid {
                        line,
                        message: "combining ENTRYPOINT and CMD is not supported".to_string(),
                    });
                }
                seen_cmd |= is_cmd;
                seen_entrypoint |= !is_cmd;

                let argv = if args.starts_with('[') {
                    parse_exec_form(line, args)?
                } else {
                    vec!["/bin/sh".to_string(), "-c".to_string(), args.to_string()]
                };
                directives.push(Directive::Cmd(argv));
            }
            _ => return Err(DockerfileError::Unsupported { line, keyword }),
        }
    }

    Ok(directives)
}

/// Join `\` continuations and drop comments, keeping the starting line number
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (body, continues) = match trimmed.strip_suffix('\\') {
            Some(body) => (body.trim_end(), true),
            None => (trimmed, false),
        };

        let entry = pending.get_or_insert_with(|| (idx + 1, String::new()));
        if !entry.1.is_empty() {
            entry.1.push(' ');
        }
        entry.1.push_str(body);

        if !continues {
            if let Some(done) = pending.take() {
                lines.push(done);
            }
        }
    }

    if let Some(done) = pending {
        lines.push(done);
    }
    lines
}

fn parse_from(line: usize, args: &str) -> Result<Directive, DockerfileError> {
    let tokens: Vec<&str> = args.split_whitespace().collect();
    if tokens.iter().any(|t| t.starts_with("--")) {
        return Err(DockerfileError::Invalid {
            line,
            message: "FROM flags are not supported".to_string(),
        });
    }
    if tokens.len() > 1 {
        return Err(DockerfileError::Invalid {
            line,
            message: "multi-stage builds are not supported".to_string(),
        });
    }
    ImageReference::parse(tokens[0])
        .map(Directive::From)
        .map_err(|source| DockerfileError::Reference { line, source })
}

fn parse_copy(line: usize, keyword: &str, args: &str) -> Result<Directive, DockerfileError> {
    let parts = if args.starts_with('[') {
        parse_exec_form(line, args)?
    } else {
        args.split_whitespace().map(str::to_string).collect()
    };

    if parts.iter().any(|p| p.starts_with("--")) {
        return Err(DockerfileError::Invalid {
            line,
            message: format!("{} flags are not supported", keyword),
        });
    }

    match parts.as_slice() {
        [from, to] => Ok(Directive::Copy {
            from: from.clone(),
            to: to.clone(),
        }),
        _ => Err(DockerfileError::Invalid {
            line,
            message: format!("{} must have exactly one source and one destination", keyword),
        }),
    }
}

fn parse_port(line: usize, token: &str) -> Result<u16, DockerfileError> {
    let (number, protocol) = token.split_once('/').unwrap_or((token, "tcp"));
    if !protocol.eq_ignore_ascii_case("tcp") {
        return Err(DockerfileError::Invalid {
            line,
            message: format!("only TCP ports can be exposed, got '{}'", token),
        });
    }
    match number.parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(DockerfileError::Invalid {
            line,
            message: format!("invalid port '{}'", token),
        }),
    }
}

fn parse_exec_form(line: usize, args: &str) -> Result<Vec<String>, DockerfileError> {
    let argv: Vec<String> = serde_json::from_str(args).map_err(|e| DockerfileError::Invalid {
        line,
        message: format!("malformed JSON array: {}", e),
    })?;
    if argv.is_empty() {
        return Err(DockerfileError::Invalid {
            line,
            message: "empty command array".to_string(),
        });
    }
    Ok(argv)
}
