//! Image references as stored by Rancher (`docker:<repository>:<tag>`).

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{RanupError, Result};

/// Scheme marker Rancher prefixes to every image UUID.
pub const IMAGE_SCHEME: &str = "docker:";

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}$").expect("tag pattern is valid")
});

static PATH_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("component pattern is valid")
});

static REGISTRY_HOST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?)*(?::[0-9]+)?$",
    )
    .expect("host pattern is valid")
});

/// Repository plus optional tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub repository: String,
    pub tag: Option<String>,
}

impl ImageRef {
    /// Parse an image UUID reported by the control plane.
    ///
    /// Control plane data is taken as-is; only requested references are
    /// checked against the reference grammar.
    pub fn parse_uuid(uuid: &str) -> Self {
        let image = uuid.strip_prefix(IMAGE_SCHEME).unwrap_or(uuid);
        let image = image.split('@').next().unwrap_or(image);
        let (repository, tag) = split_tag(image);
        Self {
            repository: repository.to_string(),
            tag: tag.map(|t| t.to_string()),
        }
    }

    /// Render as an image UUID, always carrying the scheme marker.
    pub fn to_uuid(&self) -> String {
        format!("{}{}", IMAGE_SCHEME, self)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tag {
            Some(tag) => write!(f, "{}:{}", self.repository, tag),
            None => write!(f, "{}", self.repository),
        }
    }
}

/// An image requested on the command line: a bare tag or `repository:tag`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedImage {
    Tag(String),
    Qualified { repository: String, tag: String },
}

impl RequestedImage {
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| RanupError::InvalidImageReference {
            reference: input.to_string(),
            reason: reason.to_string(),
        };

        let image = input.trim();
        let image = image.strip_prefix(IMAGE_SCHEME).unwrap_or(image);
        if image.is_empty() {
            return Err(invalid("reference is empty"));
        }

        if !image.contains(':') {
            if !TAG.is_match(image) {
                return Err(invalid("invalid tag format"));
            }
            return Ok(RequestedImage::Tag(image.to_string()));
        }

        let (repository, tag) = split_tag(image);
        let tag = tag.ok_or_else(|| invalid("reference has no tag"))?;
        if !TAG.is_match(tag) {
            return Err(invalid("invalid tag format"));
        }
        validate_repository(repository).map_err(|reason| invalid(&reason))?;

        Ok(RequestedImage::Qualified {
            repository: repository.to_string(),
            tag: tag.to_string(),
        })
    }

    /// The fully qualified image this request points at, given the current one.
    pub fn resolve_against(&self, current: &ImageRef) -> ImageRef {
        match self {
            RequestedImage::Tag(tag) => ImageRef {
                repository: current.repository.clone(),
                tag: Some(tag.clone()),
            },
            RequestedImage::Qualified { repository, tag } => ImageRef {
                repository: repository.clone(),
                tag: Some(tag.clone()),
            },
        }
    }
}

/// Split at the last `:` that is not part of a registry host.
fn split_tag(image: &str) -> (&str, Option<&str>) {
    match image.rsplit_once(':') {
        Some((repository, tag)) if !tag.contains('/') => (repository, Some(tag)),
        _ => (image, None),
    }
}

fn validate_repository(repository: &str) -> std::result::Result<(), String> {
    let mut components: Vec<&str> = repository.split('/').collect();

    // A leading component with '.', ':' or "localhost" names a registry.
    if components.len() > 1 {
        let first = components[0];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if !REGISTRY_HOST.is_match(first) {
                return Err(format!("invalid registry host {:?}", first));
            }
            components.remove(0);
        }
    }

    for component in components {
        if !PATH_COMPONENT.is_match(component) {
            return Err(format!("invalid repository component {:?}", component));
        }
    }
    Ok(())
}
