//! Launch config resolution: computes the upgrade body from the current
//! service and the requested tags and environment overrides.
//!
//! Pure functions only; nothing here talks to the control plane.

use crate::error::{RanupError, Result};
use crate::rancher::types::{InServiceStrategy, LaunchConfig, Service, ServiceUpgrade};

use super::image::{ImageRef, RequestedImage};
use super::request::{UpgradeRequest, parse_env_override};

/// Resolve a requested tag against the current image UUID.
///
/// A bare tag keeps the current repository; `repository:tag` replaces both.
/// The result always carries the `docker:` scheme and a tag.
pub fn resolve_image(current_uuid: &str, requested: &str) -> Result<String> {
    let current = ImageRef::parse_uuid(current_uuid);
    let resolved = RequestedImage::parse(requested)?.resolve_against(&current);
    Ok(resolved.to_uuid())
}

/// Merge `key=value` overrides into an environment, last write wins.
pub fn apply_env_overrides(launch_config: &mut LaunchConfig, overrides: &[String]) -> Result<()> {
    for entry in overrides {
        let (key, value) = parse_env_override(entry)?;
        launch_config.environment.insert(key, value);
    }
    Ok(())
}

/// Build the in-service upgrade for `service`: one container at a time,
/// new containers started before old ones are stopped.
pub fn resolve_upgrade(service: &Service, request: &UpgradeRequest) -> Result<ServiceUpgrade> {
    let mut launch_config = service.launch_config.clone();
    let mut secondary_launch_configs = service.secondary_launch_configs.clone();

    if let Some(tag) = request.runtime_tag() {
        launch_config.image_uuid = resolve_image(&launch_config.image_uuid, tag)?;
    }

    if let Some(tag) = request.code_tag() {
        let secondary = secondary_launch_configs
            .first_mut()
            .ok_or_else(|| RanupError::MissingSecondaryLaunchConfig(service.name.clone()))?;
        secondary.image_uuid = resolve_image(&secondary.image_uuid, tag)?;
    }

    apply_env_overrides(&mut launch_config, &request.env)?;

    Ok(ServiceUpgrade {
        in_service_strategy: InServiceStrategy {
            batch_size: 1,
            interval_millis: u64::try_from(request.interval.as_millis()).unwrap_or(u64::MAX),
            start_first: true,
            launch_config,
            secondary_launch_configs,
        },
    })
}
