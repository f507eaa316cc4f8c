//! Docker registry access used to confirm requested tags exist.

pub mod cache;
pub mod client;

use async_trait::async_trait;

use crate::error::Result;

/// Lists the tags published for a repository.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    async fn tags(&self, repository: &str) -> Result<Vec<String>>;
}
