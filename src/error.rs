//! Custom error types for ranup.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::upgrade::fleet::MemberPhase;
use crate::upgrade::validate::ValidatorKind;

pub type Result<T> = std::result::Result<T, RanupError>;

/// Errors that can occur during service upgrade operations.
#[derive(Error, Debug)]
pub enum RanupError {
    #[error("[{0}] control plane error: {1}")]
    ControlPlane(String, String),

    #[error("[{0}] registry error: {1}")]
    Registry(String, String),

    #[error("Expected exactly one service named {name}, found {matches}")]
    ServiceNotFound { name: String, matches: usize },

    #[error("No services found with name like {0}")]
    NoServicesMatched(String),

    #[error("image not found: {repository}:{tag}")]
    ImageNotFound { repository: String, tag: String },

    #[error("env: missing {}", .0.join(","))]
    MissingEnv(Vec<String>),

    #[error("Invalid image reference {reference}: {reason}")]
    InvalidImageReference { reference: String, reason: String },

    #[error("invalid env: {0}, expected key value pair in the form key=value")]
    InvalidEnv(String),

    #[error("Service {0} has no secondary launch config to apply a code tag to")]
    MissingSecondaryLaunchConfig(String),

    #[error("Failed to read env file {}: {source}", .path.display())]
    EnvFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid env file {}: line {line}: {reason}", .path.display())]
    EnvFileSyntax {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("Invalid upgrade request: {0}")]
    InvalidRequest(String),

    #[error("{validator} validation failed: {source}")]
    Validation {
        validator: ValidatorKind,
        source: Box<RanupError>,
    },

    #[error("Upgrade of {service} rejected: {source}")]
    Submission {
        service: String,
        source: Box<RanupError>,
    },

    #[error("Timeout waiting for {operation}: {details}")]
    Timeout { operation: String, details: String },

    #[error("Polling {service} failed: {source}")]
    Poll {
        service: String,
        source: Box<RanupError>,
    },

    #[error("Finishing upgrade of {service} failed: {source}")]
    Finish {
        service: String,
        source: Box<RanupError>,
    },

    #[error("Compensating action for {service} failed, manual intervention required: {source}")]
    RollbackFailed {
        service: String,
        source: Box<RanupError>,
    },

    #[error("Upgrade task for {service} aborted: {reason}")]
    TaskAborted { service: String, reason: String },

    #[error(
        "{} of {} services failed to upgrade: {}",
        .failures.len(),
        .total,
        format_failures(.failures)
    )]
    Fleet {
        total: usize,
        failures: Vec<MemberFailure>,
    },
}

/// A failed fleet member, carried by [`RanupError::Fleet`].
#[derive(Debug)]
pub struct MemberFailure {
    pub service: String,
    pub phase: MemberPhase,
    pub error: RanupError,
}

impl fmt::Display for MemberFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.service, self.phase, self.error)
    }
}

fn format_failures(failures: &[MemberFailure]) -> String {
    failures
        .iter()
        .map(|m| m.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl RanupError {
    /// Create a control plane error tagged with the calling component.
    pub fn control_plane<E: fmt::Display>(component: &str, err: E) -> Self {
        RanupError::ControlPlane(component.to_string(), single_line(&err.to_string()))
    }

    /// Create a registry error tagged with the calling component.
    pub fn registry<E: fmt::Display>(component: &str, err: E) -> Self {
        RanupError::Registry(component.to_string(), single_line(&err.to_string()))
    }

    /// Returns the innermost error, unwrapping validation and submission context.
    pub fn root_cause(&self) -> &RanupError {
        match self {
            RanupError::Validation { source, .. }
            | RanupError::Submission { source, .. }
            | RanupError::Poll { source, .. }
            | RanupError::Finish { source, .. }
            | RanupError::RollbackFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// Collapse a multi-line message (e.g. an HTML error page) into one line.
fn single_line(msg: &str) -> String {
    msg.split_whitespace().collect::<Vec<_>>().join(" ")
}
