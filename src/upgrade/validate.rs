//! Validation pipeline run before any upgrade is submitted.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::envfile::RequiredKeySource;
use super::image::{ImageRef, RequestedImage};
use super::request::UpgradeRequest;
use crate::error::{RanupError, Result};
use crate::rancher::types::Service;
use crate::registry::RegistryClient;
use crate::registry::cache::TagCache;

/// Identifies which validator rejected an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorKind {
    RegistryTag,
    RequiredEnv,
}

impl fmt::Display for ValidatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidatorKind::RegistryTag => write!(f, "registry-tag"),
            ValidatorKind::RequiredEnv => write!(f, "required-env"),
        }
    }
}

/// Checks that every requested tag is published in the registry.
pub struct RegistryTagValidator {
    registry: Arc<dyn RegistryClient>,
    cache: Arc<TagCache>,
}

impl RegistryTagValidator {
    pub fn new(registry: Arc<dyn RegistryClient>, cache: Arc<TagCache>) -> Self {
        Self { registry, cache }
    }

    pub async fn validate(&self, service: &Service, request: &UpgradeRequest) -> Result<()> {
        // Parse everything first so malformed input never reaches the registry.
        let mut expected = Vec::new();
        if let Some(tag) = request.runtime_tag() {
            expected.push(expected_image(service.image(), tag)?);
        }
        if let Some(tag) = request.code_tag() {
            let current = service
                .secondary_launch_configs
                .first()
                .map(|lc| lc.image_uuid.as_str())
                .ok_or_else(|| RanupError::MissingSecondaryLaunchConfig(service.name.clone()))?;
            expected.push(expected_image(current, tag)?);
        }

        for (repository, tag) in expected {
            debug!(service = %service.name, "Checking {}:{} in registry", repository, tag);
            if !self
                .cache
                .contains(self.registry.as_ref(), &repository, &tag)
                .await?
            {
                return Err(RanupError::ImageNotFound { repository, tag });
            }
        }
        Ok(())
    }
}

fn expected_image(current_uuid: &str, requested: &str) -> Result<(String, String)> {
    let resolved =
        RequestedImage::parse(requested)?.resolve_against(&ImageRef::parse_uuid(current_uuid));
    let tag = resolved.tag.unwrap_or_default();
    Ok((resolved.repository, tag))
}

/// Checks that the primary launch config defines every required key.
pub struct RequiredEnvValidator {
    source: Arc<dyn RequiredKeySource>,
}

impl RequiredEnvValidator {
    pub fn new(source: Arc<dyn RequiredKeySource>) -> Self {
        Self { source }
    }

    pub fn validate(&self, service: &Service) -> Result<()> {
        let environment = &service.launch_config.environment;
        let missing: Vec<String> = self
            .source
            .required_keys()?
            .into_iter()
            .filter(|key| !environment.contains_key(key))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RanupError::MissingEnv(missing))
        }
    }
}

pub enum Validator {
    RegistryTag(RegistryTagValidator),
    RequiredEnv(RequiredEnvValidator),
}

impl Validator {
    pub fn kind(&self) -> ValidatorKind {
        match self {
            Validator::RegistryTag(_) => ValidatorKind::RegistryTag,
            Validator::RequiredEnv(_) => ValidatorKind::RequiredEnv,
        }
    }

    pub async fn validate(&self, service: &Service, request: &UpgradeRequest) -> Result<()> {
        match self {
            Validator::RegistryTag(v) => v.validate(service, request).await,
            Validator::RequiredEnv(v) => v.validate(service),
        }
    }
}

/// Validators in registration order; the first failure stops the run.
#[derive(Default)]
pub struct Pipeline {
    validators: Vec<Validator>,
}

impl Pipeline {
    pub fn new(validators: Vec<Validator>) -> Self {
        Self { validators }
    }

    pub fn kinds(&self) -> Vec<ValidatorKind> {
        self.validators.iter().map(Validator::kind).collect()
    }

    pub async fn validate(&self, service: &Service, request: &UpgradeRequest) -> Result<()> {
        for validator in &self.validators {
            validator
                .validate(service, request)
                .await
                .map_err(|e| RanupError::Validation {
                    validator: validator.kind(),
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }
}
