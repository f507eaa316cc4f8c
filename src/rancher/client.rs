//! Rancher v1 API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::ControlPlane;
use super::types::{ApiError, Collection, Service, ServiceFilter, ServiceUpgrade};
use crate::error::{RanupError, Result};

/// HTTP client for a Rancher environment API endpoint (`CATTLE_URL`).
pub struct RancherClient {
    http: reqwest::Client,
    base_url: String,
    access_key: String,
    secret_key: SecretString,
}

impl RancherClient {
    /// Create a new client authenticating with an API key pair.
    pub fn new(
        url: &str,
        access_key: &str,
        secret_key: SecretString,
        timeout: Duration,
    ) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(RanupError::control_plane(
                module_path!(),
                "CATTLE_URL is not configured",
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RanupError::control_plane(module_path!(), e))?;

        Ok(Self {
            http,
            base_url: url.trim_end_matches('/').to_string(),
            access_key: access_key.to_string(),
            secret_key,
        })
    }

    fn service_url(&self, id: &str) -> String {
        format!("{}/services/{}", self.base_url, id)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .basic_auth(&self.access_key, Some(self.secret_key.expose_secret()))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| RanupError::control_plane(module_path!(), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .ok()
                .and_then(|e| e.message.or(e.code))
                .unwrap_or(body);
            return Err(RanupError::control_plane(
                module_path!(),
                format!("{}: {}", status, message),
            ));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| RanupError::control_plane(module_path!(), e))
    }

    async fn action(
        &self,
        service: &Service,
        action: &str,
        body: Option<&ServiceUpgrade>,
    ) -> Result<Service> {
        debug!("Calling {} on service {} ({})", action, service.name, service.id);

        let request = self
            .http
            .post(format!("{}/", self.service_url(&service.id)))
            .query(&[("action", action)]);
        let request = match body {
            Some(upgrade) => request.json(upgrade),
            None => request.json(&serde_json::json!({})),
        };

        self.send(request).await
    }
}

#[async_trait]
impl ControlPlane for RancherClient {
    async fn list_services(&self, filter: &ServiceFilter) -> Result<Vec<Service>> {
        debug!("Listing services with filter: {:?}", filter);

        let request = self
            .http
            .get(format!("{}/services", self.base_url))
            .query(&filter.to_query());
        let collection: Collection<Service> = self.send(request).await?;

        debug!("Found {} services", collection.data.len());
        Ok(collection.data)
    }

    async fn submit_upgrade(&self, service: &Service, upgrade: &ServiceUpgrade) -> Result<Service> {
        self.action(service, "upgrade", Some(upgrade)).await
    }

    async fn finish_upgrade(&self, service: &Service) -> Result<Service> {
        self.action(service, "finishupgrade", None).await
    }

    async fn cancel_upgrade(&self, service: &Service) -> Result<Service> {
        self.action(service, "cancelupgrade", None).await
    }

    async fn rollback(&self, service: &Service) -> Result<Service> {
        self.action(service, "rollback", None).await
    }

    async fn reload(&self, service: &Service) -> Result<Service> {
        let request = self.http.get(self.service_url(&service.id));
        self.send(request).await
    }
}
