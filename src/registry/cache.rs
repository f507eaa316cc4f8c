//! Per-run cache of registry tag listings.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;
use tracing::debug;

use super::RegistryClient;
use crate::error::Result;

/// Repository -> tags, filled lazily and never invalidated.
///
/// Each repository has its own cell, so at most one fetch per repository is
/// in flight while lookups for other repositories proceed. A failed fetch
/// leaves the cell empty and the next caller retries.
#[derive(Default)]
pub struct TagCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<Vec<String>>>>>,
}

impl TagCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn cell(&self, repository: &str) -> Arc<OnceCell<Vec<String>>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(entries.entry(repository.to_string()).or_default())
    }

    /// Returns whether `tag` is published for `repository`, fetching on miss.
    pub async fn contains(
        &self,
        registry: &dyn RegistryClient,
        repository: &str,
        tag: &str,
    ) -> Result<bool> {
        let cell = self.cell(repository);
        let tags = cell
            .get_or_try_init(|| async {
                debug!("Tag cache miss for {}", repository);
                registry.tags(repository).await
            })
            .await?;

        Ok(tags.iter().any(|t| t == tag))
    }

    /// Number of repositories with a cached listing.
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|c| c.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
