//! Base image references
//!
//! Parses references of the form `[registry/]repository[:tag][@digest]` and
//! decides whether a reference is pinned (repeatable) or floating.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

const FLOATING_TAG: &str = "latest";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReferenceError {
    #[error("image reference cannot be empty")]
    Empty,

    #[error("image reference '{0}' contains whitespace")]
    Whitespace(String),

    #[error("image reference '{0}' has an empty repository")]
    EmptyRepository(String),

    #[error("repository '{0}' must be lowercase")]
    UppercaseRepository(String),

    #[error("invalid repository component '{0}'")]
    InvalidRepository(String),

    #[error("invalid tag '{0}'")]
    InvalidTag(String),

    #[error("invalid digest '{0}': expected sha256 followed by 64 lowercase hex characters")]
    InvalidDigest(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageReference {
    registry: Option<String>,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

fn component_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("valid regex")
    })
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]{0,127}$").expect("valid regex"))
}

fn digest_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^sha256:[0-9a-f]{64}$").expect("valid regex"))
}

impl ImageReference {
    pub fn parse(input: &str) -> Result<Self, ReferenceError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(ReferenceError::Empty);
        }
        if input.chars().any(char::is_whitespace) {
            return Err(ReferenceError::Whitespace(input.to_string()));
        }

        let (rest, digest) = match input.split_once('@') {
            Some((rest, digest)) => {
                if !digest_re().is_match(digest) {
                    return Err(ReferenceError::InvalidDigest(digest.to_string()));
                }
                (rest, Some(digest.to_string()))
            }
            None => (input, None),
        };

        // A colon after the last slash separates the tag; earlier colons belong
        // to a registry port.
        let last_slash = rest.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (name, tag) = match rest[last_slash..].rfind(':') {
            Some(pos) => {
                let split = last_slash + pos;
                let tag = &rest[split + 1..];
                if !tag_re().is_match(tag) {
                    return Err(ReferenceError::InvalidTag(tag.to_string()));
                }
                (&rest[..split], Some(tag.to_string()))
            }
            None => (rest, None),
        };

        if name.is_empty() {
            return Err(ReferenceError::EmptyRepository(input.to_string()));
        }

        let mut components: Vec<&str> = name.split('/').collect();
        let registry = if components.len() > 1 && is_registry(components[0]) {
            Some(components.remove(0).to_string())
        } else {
            None
        };

        for component in &components {
            if component.is_empty() {
                return Err(ReferenceError::EmptyRepository(input.to_string()));
            }
            if component.chars().any(|c| c.is_ascii_uppercase()) {
                return Err(ReferenceError::UppercaseRepository(name.to_string()));
            }
            if !component_re().is_match(component) {
                return Err(ReferenceError::InvalidRepository(component.to_string()));
            }
        }

        Ok(Self {
            registry,
            repository: components.join("/"),
            tag,
            digest,
        })
    }

    pub fn registry(&self) -> Option<&str> {
        self.registry.as_deref()
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// A pinned reference resolves to the same image on every build: it carries
    /// a digest, or an explicit tag other than `latest`.
    pub fn is_pinned(&self) -> bool {
        if self.digest.is_some() {
            return true;
        }
        matches!(self.tag.as_deref(), Some(tag) if tag != FLOATING_TAG)
    }
}

fn is_registry(component: &str) -> bool {
    component == "localhost" || component.contains('.') || component.contains(':')
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(registry) = &self.registry {
            write!(f, "{}/", registry)?;
        }
        write!(f, "{}", self.repository)?;
        if let Some(tag) = &self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl FromStr for ImageReference {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageReference {
    type Error = ReferenceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageReference> for String {
    fn from(reference: ImageReference) -> Self {
        reference.to_string()
    }
}
