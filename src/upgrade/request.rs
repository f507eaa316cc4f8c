//! Upgrade request parameters.

use std::time::Duration;

use crate::error::{RanupError, Result};

/// Default interval between starting new containers and stopping old ones.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// A member gives up waiting after this many roll intervals.
pub const WAIT_TIMEOUT_FACTOR: u32 = 20;

/// Which services an upgrade targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceSelector {
    /// Exactly one service with this name.
    Name(String),
    /// Every plain service whose name starts with this prefix.
    Prefix(String),
}

impl ServiceSelector {
    pub fn value(&self) -> &str {
        match self {
            ServiceSelector::Name(v) | ServiceSelector::Prefix(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    pub selector: ServiceSelector,
    pub runtime_tag: Option<String>,
    pub code_tag: Option<String>,
    /// Raw `key=value` overrides for the primary launch config.
    pub env: Vec<String>,
    pub interval: Duration,
    pub wait: bool,
}

impl UpgradeRequest {
    pub fn new(selector: ServiceSelector) -> Self {
        Self {
            selector,
            runtime_tag: None,
            code_tag: None,
            env: Vec::new(),
            interval: DEFAULT_INTERVAL,
            wait: false,
        }
    }

    pub fn with_runtime_tag(mut self, tag: &str) -> Self {
        self.runtime_tag = Some(tag.to_string());
        self
    }

    pub fn with_code_tag(mut self, tag: &str) -> Self {
        self.code_tag = Some(tag.to_string());
        self
    }

    pub fn with_env(mut self, env: &str) -> Self {
        self.env.push(env.to_string());
        self
    }

    /// A zero interval falls back to [`DEFAULT_INTERVAL`].
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = if interval.is_zero() {
            DEFAULT_INTERVAL
        } else {
            interval
        };
        self
    }

    pub fn with_wait(mut self, wait: bool) -> Self {
        self.wait = wait;
        self
    }

    /// Requested runtime tag, if non-empty.
    pub fn runtime_tag(&self) -> Option<&str> {
        self.runtime_tag.as_deref().filter(|t| !t.is_empty())
    }

    /// Requested code tag, if non-empty.
    pub fn code_tag(&self) -> Option<&str> {
        self.code_tag.as_deref().filter(|t| !t.is_empty())
    }

    /// Deadline for one member to become stable.
    pub fn wait_timeout(&self) -> Duration {
        self.interval.saturating_mul(WAIT_TIMEOUT_FACTOR)
    }

    /// The same request narrowed to a single named service.
    pub fn for_service(&self, name: &str) -> Self {
        Self {
            selector: ServiceSelector::Name(name.to_string()),
            ..self.clone()
        }
    }

    /// Reject requests that can never succeed before touching any service.
    pub fn validate(&self) -> Result<()> {
        if self.selector.value().trim().is_empty() {
            return Err(RanupError::InvalidRequest(
                "service name or name prefix must not be empty".to_string(),
            ));
        }
        for env in &self.env {
            parse_env_override(env)?;
        }
        Ok(())
    }
}

/// Split `key=value` at the first `=`.
pub fn parse_env_override(env: &str) -> Result<(String, String)> {
    match env.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(RanupError::InvalidEnv(env.to_string())),
    }
}
