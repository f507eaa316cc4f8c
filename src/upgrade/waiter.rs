//! Waits for a submitted upgrade to settle.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{RanupError, Result};
use crate::rancher::ControlPlane;
use crate::rancher::types::{Service, Transitioning};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(150);

#[derive(Clone)]
pub struct CompletionWaiter {
    control_plane: Arc<dyn ControlPlane>,
    poll_interval: Duration,
}

impl CompletionWaiter {
    pub fn new(control_plane: Arc<dyn ControlPlane>, poll_interval: Duration) -> Self {
        Self {
            control_plane,
            poll_interval,
        }
    }

    /// Poll `service` until it stops transitioning or `timeout` elapses.
    ///
    /// The poller and the deadline race; whichever loses is dropped before
    /// this returns, so no reload outlives the call.
    pub async fn wait(&self, service: &Service, timeout: Duration) -> Result<Service> {
        tokio::select! {
            biased;
            result = self.poll_until_stable(service) => result,
            _ = tokio::time::sleep(timeout) => Err(RanupError::Timeout {
                operation: format!("upgrade of {}", service.name),
                details: format!("service still transitioning after {:?}", timeout),
            }),
        }
    }

    async fn poll_until_stable(&self, service: &Service) -> Result<Service> {
        let mut current = service.clone();
        loop {
            match current.transitioning {
                Transitioning::No => return Ok(current),
                Transitioning::Error => {
                    warn!(
                        service = %current.name,
                        "Control plane reported a transitioning error: {}",
                        current.transitioning_message.as_deref().unwrap_or("no message")
                    );
                    return Ok(current);
                }
                Transitioning::Yes => {
                    debug!(service = %current.name, "Still transitioning (state: {})", current.state);
                }
            }

            tokio::time::sleep(self.poll_interval).await;
            current = self
                .control_plane
                .reload(&current)
                .await
                .map_err(|e| RanupError::Poll {
                    service: service.name.clone(),
                    source: Box::new(e),
                })?;
        }
    }
}
