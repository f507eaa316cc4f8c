//! Rancher control plane operations.

pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::{RanupError, Result};
use types::{Service, ServiceFilter, ServiceUpgrade};

/// Operations the upgrade workflow needs from the control plane.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn list_services(&self, filter: &ServiceFilter) -> Result<Vec<Service>>;

    async fn submit_upgrade(&self, service: &Service, upgrade: &ServiceUpgrade) -> Result<Service>;

    async fn finish_upgrade(&self, service: &Service) -> Result<Service>;

    async fn cancel_upgrade(&self, service: &Service) -> Result<Service>;

    async fn rollback(&self, service: &Service) -> Result<Service>;

    /// Re-fetch the service to refresh `transitioning` and launch configs.
    async fn reload(&self, service: &Service) -> Result<Service>;

    /// Look up a service by exact name. Zero or several matches is an error.
    async fn service_by_name(&self, name: &str) -> Result<Service> {
        let mut services = self.list_services(&ServiceFilter::by_name(name)).await?;
        services.retain(|s| s.name == name);

        if services.len() != 1 {
            return Err(RanupError::ServiceNotFound {
                name: name.to_string(),
                matches: services.len(),
            });
        }
        Ok(services.remove(0))
    }
}
