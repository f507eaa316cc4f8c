//! Single-service upgrade: lookup, validate, resolve, submit.

use std::sync::Arc;

use tracing::{debug, info};

use super::launch::resolve_upgrade;
use super::request::UpgradeRequest;
use super::validate::Pipeline;
use crate::error::{RanupError, Result};
use crate::rancher::ControlPlane;
use crate::rancher::types::{Service, ServiceUpgrade};

/// A validated upgrade that has not been submitted yet.
#[derive(Debug, Clone)]
pub struct UpgradePlan {
    pub service: Service,
    pub upgrade: ServiceUpgrade,
}

impl UpgradePlan {
    /// The service as it would look once the upgrade is applied.
    pub fn preview(&self) -> Service {
        let strategy = &self.upgrade.in_service_strategy;
        Service {
            launch_config: strategy.launch_config.clone(),
            secondary_launch_configs: strategy.secondary_launch_configs.clone(),
            ..self.service.clone()
        }
    }
}

#[derive(Clone)]
pub struct Executor {
    control_plane: Arc<dyn ControlPlane>,
    pipeline: Arc<Pipeline>,
}

impl Executor {
    pub fn new(control_plane: Arc<dyn ControlPlane>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            control_plane,
            pipeline,
        }
    }

    /// Look up `name`, run every validator and compute the upgrade body.
    pub async fn plan(&self, name: &str, request: &UpgradeRequest) -> Result<UpgradePlan> {
        let service = self.control_plane.service_by_name(name).await?;
        debug!(service = %service.name, "Found service {} ({})", service.id, service.image());

        self.pipeline.validate(&service, request).await?;
        let upgrade = resolve_upgrade(&service, request)?;

        Ok(UpgradePlan { service, upgrade })
    }

    /// Submit a planned upgrade. The control plane is not retried.
    pub async fn submit(&self, plan: &UpgradePlan) -> Result<Service> {
        info!(
            service = %plan.service.name,
            "Submitting upgrade to {}",
            plan.upgrade.in_service_strategy.launch_config.image_uuid
        );

        self.control_plane
            .submit_upgrade(&plan.service, &plan.upgrade)
            .await
            .map_err(|e| RanupError::Submission {
                service: plan.service.name.clone(),
                source: Box::new(e),
            })
    }
}
