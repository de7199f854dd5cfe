//! Python dependency manifest (`requirements.txt`)
//!
//! The manifest is consumed, not owned: runpack only separates names from
//! version specifiers and leaves resolution to pip at build time.

use crate::fs::FileSystem;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("line {line}: invalid requirement '{content}'")]
    InvalidLine { line: usize, content: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extras: Vec<String>,
    /// Version constraint or `@ url` reference, verbatim
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
    pub line: usize,
}

impl Requirement {
    /// PEP 503 normalized name
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }

    /// Marker with whitespace removed; quoting is left as written
    pub fn normalized_marker(&self) -> Option<String> {
        self.marker
            .as_deref()
            .map(|m| m.split_whitespace().collect::<String>())
            .filter(|m| !m.is_empty())
    }
}

pub fn normalize_name(name: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[-_.]+").expect("valid regex"));
    re.replace_all(name, "-").to_lowercase()
}

fn requirement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9](?:[A-Za-z0-9._\-]*[A-Za-z0-9])?)\s*(?:\[([^\]]*)\])?\s*(.*)$")
            .expect("valid regex")
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyManifest {
    pub requirements: Vec<Requirement>,
    /// Option lines (`--index-url`, `-r`, `-e`, ...) and direct URLs, verbatim
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl DependencyManifest {
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let mut manifest = Self::default();

        for (line, content) in logical_lines(text) {
            if content.starts_with('-') || (content.contains("://") && !content.contains('@')) {
                manifest.options.push(content);
                continue;
            }
            manifest.requirements.push(parse_requirement(line, &content)?);
        }

        Ok(manifest)
    }

    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self> {
        let text = fs
            .read_to_string(path)
            .with_context(|| format!("Failed to read dependency manifest {}", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("Invalid dependency manifest {}", path.display()))
    }

    pub fn names(&self) -> Vec<&str> {
        self.requirements.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        let wanted = normalize_name(name);
        self.requirements
            .iter()
            .any(|r| r.normalized_name() == wanted)
    }

    /// Requirements named more than once under the same environment marker,
    /// as `(normalized name, lines)` in first-seen order
    ///
    /// Entries split across different markers select one line per
    /// environment and are not duplicates.
    pub fn duplicates(&self) -> Vec<(String, Vec<usize>)> {
        let mut order = Vec::new();
        let mut lines: HashMap<(String, Option<String>), Vec<usize>> = HashMap::new();
        for requirement in &self.requirements {
            let key = (requirement.normalized_name(), requirement.normalized_marker());
            let entry = lines.entry(key.clone()).or_default();
            if entry.is_empty() {
                order.push(key);
            }
            entry.push(requirement.line);
        }

        order
            .into_iter()
            .filter_map(|key| {
                let seen = lines.remove(&key)?;
                (seen.len() > 1).then_some((key.0, seen))
            })
            .collect()
    }
}

fn parse_requirement(line: usize, content: &str) -> Result<Requirement, ManifestError> {
    let invalid = || ManifestError::InvalidLine {
        line,
        content: content.to_string(),
    };

    let (body, marker) = match content.split_once(';') {
        Some((body, marker)) => (body.trim(), Some(marker.trim().to_string())),
        None => (content, None),
    };

    let caps = requirement_re().captures(body).ok_or_else(invalid)?;
    let name = caps.get(1).ok_or_else(invalid)?.as_str().to_string();

    let extras = caps
        .get(2)
        .map(|m| {
            m.as_str()
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let rest = caps.get(3).map(|m| m.as_str().trim()).unwrap_or_default();
    let specifier = if rest.is_empty() {
        None
    } else if rest.starts_with(|c: char| "=<>!~@(".contains(c)) {
        Some(rest.to_string())
    } else {
        return Err(invalid());
    };

    Ok(Requirement {
        name,
        extras,
        specifier,
        marker: marker.filter(|m| !m.is_empty()),
        line,
    })
}

/// Strip comments and join `\` continuations, keeping the first line number
fn logical_lines(text: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in text.lines().enumerate() {
        let without_comment = strip_comment(raw);
        let (body, continues) = match without_comment.trim_end().strip_suffix('\\') {
            Some(body) => (body, true),
            None => (without_comment, false),
        };

        let entry = pending.get_or_insert_with(|| (idx + 1, String::new()));
        let body = body.trim();
        if !body.is_empty() {
            if !entry.1.is_empty() {
                entry.1.push(' ');
            }
            entry.1.push_str(body);
        }

        if !continues {
            if let Some((line, content)) = pending.take() {
                if !content.is_empty() {
                    lines.push((line, content));
                }
            }
        }
    }

    if let Some((line, content)) = pending {
        if !content.is_empty() {
            lines.push((line, content));
        }
    }
    lines
}

/// A `#` starts a comment at line start or after whitespace
fn strip_comment(line: &str) -> &str {
    if line.trim_start().starts_with('#') {
        return "";
    }
    match line.find(" #").or_else(|| line.find("\t#")) {
        Some(pos) => &line[..pos],
        None => line,
    }
}
