//! Docker Registry HTTP API v2 client.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use reqwest::header::LINK;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use super::RegistryClient;
use crate::error::{RanupError, Result};

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Registry credentials for HTTP basic auth.
pub struct RegistryAuth {
    pub username: String,
    pub password: SecretString,
}

/// Client for a private registry exposing `/v2/<name>/tags/list`.
pub struct HttpRegistryClient {
    http: reqwest::Client,
    base_url: Url,
    auth: Option<RegistryAuth>,
}

impl HttpRegistryClient {
    pub fn new(url: &str, auth: Option<RegistryAuth>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(url).map_err(|e| {
            RanupError::registry(module_path!(), format!("invalid registry URL {:?}: {}", url, e))
        })?;

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RanupError::registry(module_path!(), e))?;

        Ok(Self {
            http,
            base_url,
            auth,
        })
    }

    fn tags_url(&self, repository: &str) -> Result<Url> {
        // Image references may carry this registry's host as their first component.
        let host = match (self.base_url.host_str(), self.base_url.port()) {
            (Some(host), Some(port)) => format!("{}:{}/", host, port),
            (Some(host), None) => format!("{}/", host),
            (None, _) => String::new(),
        };
        let repository = repository
            .strip_prefix(host.as_str())
            .filter(|_| !host.is_empty())
            .unwrap_or(repository);

        self.base_url
            .join(&format!("/v2/{}/tags/list", repository))
            .map_err(|e| RanupError::registry(module_path!(), e))
    }

    async fn fetch_page(&self, url: Url) -> Result<(Vec<String>, Option<Url>)> {
        let mut request = self.http.get(url);
        if let Some(auth) = &self.auth {
            request = request.basic_auth(&auth.username, Some(auth.password.expose_secret()));
        }

        let response = request
            .send()
            .await
            .map_err(|e| RanupError::registry(module_path!(), e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RanupError::registry(
                module_path!(),
                format!("{}: {}", status, body),
            ));
        }

        let next = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_link)
            .and_then(|link| self.base_url.join(&link).ok());

        let list: TagList = response
            .json()
            .await
            .map_err(|e| RanupError::registry(module_path!(), e))?;

        Ok((list.tags.unwrap_or_default(), next))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistryClient {
    async fn tags(&self, repository: &str) -> Result<Vec<String>> {
        debug!("Listing registry tags for {}", repository);

        let mut tags = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(self.tags_url(repository)?);

        while let Some(url) = next.take() {
            if !visited.insert(url.clone()) {
                warn!("Registry pagination for {} revisited {}, stopping", repository, url);
                break;
            }
            let (page, link) = self.fetch_page(url).await?;
            tags.extend(page);
            next = link;
        }

        debug!("Found {} tags for {}", tags.len(), repository);
        Ok(tags)
    }
}

/// Extract the target of a `rel="next"` entry from a Link header.
fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let (target, params) = entry.split_once(';')?;
        if !params.contains("rel=\"next\"") {
            return None;
        }
        let target = target.trim();
        target
            .strip_prefix('<')
            .and_then(|t| t.strip_suffix('>'))
            .map(|t| t.to_string())
    })
}
