//! In-memory control plane and registry fakes for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{RanupError, Result};
use crate::rancher::ControlPlane;
use crate::rancher::types::{
    LaunchConfig, Service, ServiceFilter, ServiceUpgrade, Transitioning,
};
use crate::registry::RegistryClient;
use crate::upgrade::envfile::RequiredKeySource;

/// Build a service with a primary image and empty environment.
pub fn service(id: &str, name: &str, image: &str) -> Service {
    Service {
        id: id.to_string(),
        name: name.to_string(),
        kind: "service".to_string(),
        state: "active".to_string(),
        launch_config: LaunchConfig {
            image_uuid: image.to_string(),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Registry returning a fixed tag list and counting calls.
pub struct CountingRegistry {
    tags: Vec<String>,
    calls: AtomicUsize,
}

impl CountingRegistry {
    pub fn new(tags: &[&str]) -> Self {
        Self {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryClient for CountingRegistry {
    async fn tags(&self, _repository: &str) -> Result<Vec<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(self.tags.clone())
    }
}

/// Registry whose every call fails.
pub struct FailingRegistry;

#[async_trait]
impl RegistryClient for FailingRegistry {
    async fn tags(&self, _repository: &str) -> Result<Vec<String>> {
        Err(RanupError::registry("testing", "failed to retrieve tags"))
    }
}

/// Fixed list of required keys.
pub struct StaticKeys(pub Vec<String>);

impl StaticKeys {
    pub fn new(keys: &[&str]) -> Self {
        Self(keys.iter().map(|k| k.to_string()).collect())
    }
}

impl RequiredKeySource for StaticKeys {
    fn required_keys(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// Control plane holding services in memory and recording every action.
///
/// After `submit_upgrade` a service is transitioning until it has been
/// reloaded `stable_after` times (default 1).
#[derive(Default)]
pub struct FakeControlPlane {
    services: Mutex<Vec<Service>>,
    stable_after: HashMap<String, usize>,
    fail_submit: HashSet<String>,
    fail_reload: HashSet<String>,
    fail_finish: HashSet<String>,
    fail_compensation: HashSet<String>,
    like_wildcards: bool,
    submit_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    reloads: Mutex<HashMap<String, usize>>,
    submitted: Mutex<Vec<(String, ServiceUpgrade)>>,
    finished: Mutex<Vec<String>>,
    cancelled: Mutex<Vec<String>>,
    rolled_back: Mutex<Vec<String>>,
}

impl FakeControlPlane {
    pub fn new(services: Vec<Service>) -> Self {
        Self {
            services: Mutex::new(services),
            ..Default::default()
        }
    }

    pub fn stable_after(mut self, name: &str, reloads: usize) -> Self {
        self.stable_after.insert(name.to_string(), reloads);
        self
    }

    pub fn never_stable(self, name: &str) -> Self {
        self.stable_after(name, usize::MAX)
    }

    pub fn fail_submit(mut self, name: &str) -> Self {
        self.fail_submit.insert(name.to_string());
        self
    }

    pub fn fail_reload(mut self, name: &str) -> Self {
        self.fail_reload.insert(name.to_string());
        self
    }

    pub fn fail_finish(mut self, name: &str) -> Self {
        self.fail_finish.insert(name.to_string());
        self
    }

    pub fn fail_compensation(mut self, name: &str) -> Self {
        self.fail_compensation.insert(name.to_string());
        self
    }

    /// Match name prefixes the way the Rancher API matches `name_like`,
    /// with `_` standing for any single character.
    pub fn like_wildcards(mut self) -> Self {
        self.like_wildcards = true;
        self
    }

    /// Hold every `submit_upgrade` call open for `delay`.
    pub fn submit_delay(mut self, delay: Duration) -> Self {
        self.submit_delay = Some(delay);
        self
    }

    /// Highest number of `submit_upgrade` calls seen running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<(String, ServiceUpgrade)> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<String> {
        sorted(&self.finished)
    }

    pub fn cancelled(&self) -> Vec<String> {
        sorted(&self.cancelled)
    }

    pub fn rolled_back(&self) -> Vec<String> {
        sorted(&self.rolled_back)
    }

    pub fn reloads(&self, name: &str) -> usize {
        self.reloads.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    fn stored(&self, id: &str) -> Result<Service> {
        self.services
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| RanupError::control_plane("testing", format!("no service {}", id)))
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut Service)) -> Result<Service> {
        let mut services = self.services.lock().unwrap();
        let service = services
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| RanupError::control_plane("testing", format!("no service {}", id)))?;
        f(service);
        Ok(service.clone())
    }

    fn compensate(&self, service: &Service, log: &Mutex<Vec<String>>) -> Result<Service> {
        log.lock().unwrap().push(service.name.clone());
        if self.fail_compensation.contains(&service.name) {
            return Err(RanupError::control_plane("testing", "compensation rejected"));
        }
        self.update(&service.id, |s| {
            s.transitioning = Transitioning::No;
            s.state = "canceled-upgrade".to_string();
        })
    }
}

fn like_prefix(name: &str, pattern: &str) -> bool {
    let mut name = name.chars();
    for p in pattern.chars() {
        match (p, name.next()) {
            ('%', _) => return true,
            ('_', Some(_)) => {}
            (p, Some(c)) if p == c => {}
            _ => return false,
        }
    }
    true
}

fn sorted(log: &Mutex<Vec<String>>) -> Vec<String> {
    let mut names = log.lock().unwrap().clone();
    names.sort();
    names
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn list_services(&self, filter: &ServiceFilter) -> Result<Vec<Service>> {
        let services = self.services.lock().unwrap();
        Ok(services
            .iter()
            .filter(|s| filter.name.as_ref().is_none_or(|n| &s.name == n))
            .filter(|s| {
                filter.name_prefix.as_ref().is_none_or(|p| {
                    if self.like_wildcards {
                        like_prefix(&s.name, p)
                    } else {
                        s.name.starts_with(p.as_str())
                    }
                })
            })
            .filter(|s| filter.kind.as_ref().is_none_or(|k| &s.kind == k))
            .cloned()
            .collect())
    }

    async fn submit_upgrade(&self, service: &Service, upgrade: &ServiceUpgrade) -> Result<Service> {
        if self.fail_submit.contains(&service.name) {
            return Err(RanupError::control_plane("testing", "upgrade rejected"));
        }
        if let Some(delay) = self.submit_delay {
            let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.submitted
            .lock()
            .unwrap()
            .push((service.name.clone(), upgrade.clone()));

        let strategy = upgrade.in_service_strategy.clone();
        self.update(&service.id, |s| {
            s.launch_config = strategy.launch_config;
            s.secondary_launch_configs = strategy.secondary_launch_configs;
            s.transitioning = Transitioning::Yes;
            s.state = "upgrading".to_string();
        })
    }

    async fn finish_upgrade(&self, service: &Service) -> Result<Service> {
        self.finished.lock().unwrap().push(service.name.clone());
        if self.fail_finish.contains(&service.name) {
            return Err(RanupError::control_plane("testing", "finish rejected"));
        }
        self.update(&service.id, |s| s.state = "active".to_string())
    }

    async fn cancel_upgrade(&self, service: &Service) -> Result<Service> {
        self.compensate(service, &self.cancelled)
    }

    async fn rollback(&self, service: &Service) -> Result<Service> {
        self.compensate(service, &self.rolled_back)
    }

    async fn reload(&self, service: &Service) -> Result<Service> {
        if self.fail_reload.contains(&service.name) {
            return Err(RanupError::control_plane("testing", "reload failed"));
        }

        let count = {
            let mut reloads = self.reloads.lock().unwrap();
            let count = reloads.entry(service.name.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let threshold = self.stable_after.get(&service.name).copied().unwrap_or(1);

        if count >= threshold {
            self.update(&service.id, |s| s.transitioning = Transitioning::No)
        } else {
            self.stored(&service.id)
        }
    }
}
