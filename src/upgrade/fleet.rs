//! Fleet orchestration: fans an upgrade out over every matching service,
//! collects one outcome per member and compensates failed members.
//!
//! Members run on a bounded pool of tokio tasks. A failing member never
//! cancels its siblings, and members that succeeded are left alone.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::envfile::RequiredKeySource;
use super::executor::Executor;
use super::request::{ServiceSelector, UpgradeRequest};
use super::validate::{Pipeline, RegistryTagValidator, RequiredEnvValidator, Validator};
use super::waiter::{CompletionWaiter, DEFAULT_POLL_INTERVAL};
use crate::error::{MemberFailure, RanupError, Result};
use crate::rancher::ControlPlane;
use crate::rancher::types::{Service, ServiceFilter};
use crate::registry::RegistryClient;
use crate::registry::cache::TagCache;

/// Default number of members upgraded at the same time.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Progress of one fleet member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberPhase {
    Pending,
    Validating,
    Upgrading,
    Waiting,
    Finishing,
    Done,
    Failed,
    RolledBack,
}

impl fmt::Display for MemberPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemberPhase::Pending => "pending",
            MemberPhase::Validating => "validating",
            MemberPhase::Upgrading => "upgrading",
            MemberPhase::Waiting => "waiting",
            MemberPhase::Finishing => "finishing",
            MemberPhase::Done => "done",
            MemberPhase::Failed => "failed",
            MemberPhase::RolledBack => "rolled-back",
        };
        write!(f, "{}", s)
    }
}

/// Action taken against a member whose upgrade failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Compensation {
    /// Cancel the in-progress upgrade
    #[default]
    Cancel,
    /// Roll the service back to its previous launch config
    Rollback,
}

impl fmt::Display for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compensation::Cancel => write!(f, "cancel"),
            Compensation::Rollback => write!(f, "rollback"),
        }
    }
}

/// Result of one member's run.
#[derive(Debug)]
pub struct UpgradeOutcome {
    pub service: String,
    /// Last phase entered. `Done` on success.
    pub phase: MemberPhase,
    /// Latest known state of the service, if it was ever found.
    pub snapshot: Option<Service>,
    pub result: Result<Service>,
}

impl UpgradeOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn service_id(&self) -> Option<&str> {
        self.snapshot.as_ref().map(|s| s.id.as_str())
    }
}

#[derive(Debug)]
pub struct FleetReport {
    pub outcomes: Vec<UpgradeOutcome>,
    /// Members a compensating action was issued for.
    pub compensated: Vec<String>,
    /// Rejected compensating action that stopped the compensation pass.
    pub compensation_error: Option<RanupError>,
    pub dry_run: bool,
}

impl FleetReport {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }

    /// Terminal state of a member once compensation has run.
    pub fn final_state(&self, outcome: &UpgradeOutcome) -> MemberPhase {
        if outcome.is_success() {
            MemberPhase::Done
        } else if self.compensated.contains(&outcome.service) {
            MemberPhase::RolledBack
        } else {
            MemberPhase::Failed
        }
    }

    /// Services of every member, or a `Fleet` error listing the failures.
    /// A rejected compensating action takes precedence over member failures.
    pub fn into_result(self) -> Result<Vec<Service>> {
        if let Some(error) = self.compensation_error {
            return Err(error);
        }

        let total = self.outcomes.len();
        let mut services = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for outcome in self.outcomes {
            match outcome.result {
                Ok(service) => services.push(service),
                Err(error) => failures.push(MemberFailure {
                    service: outcome.service,
                    phase: outcome.phase,
                    error,
                }),
            }
        }

        if failures.is_empty() {
            Ok(services)
        } else {
            Err(RanupError::Fleet { total, failures })
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub compensation: Compensation,
    pub dry_run: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            poll_interval: DEFAULT_POLL_INTERVAL,
            compensation: Compensation::default(),
            dry_run: false,
        }
    }
}

/// A service selected for upgrade.
struct Target {
    name: String,
    snapshot: Option<Service>,
}

pub struct Orchestrator {
    control_plane: Arc<dyn ControlPlane>,
    runner: MemberRunner,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Build an orchestrator for one run. Registry tags are cached for the
    /// lifetime of the orchestrator.
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        registry: Arc<dyn RegistryClient>,
        required_keys: Option<Arc<dyn RequiredKeySource>>,
        settings: OrchestratorSettings,
    ) -> Self {
        let mut validators = vec![Validator::RegistryTag(RegistryTagValidator::new(
            registry,
            Arc::new(TagCache::new()),
        ))];
        if let Some(source) = required_keys {
            validators.push(Validator::RequiredEnv(RequiredEnvValidator::new(source)));
        }
        let pipeline = Arc::new(Pipeline::new(validators));
        debug!("Validators: {:?}", pipeline.kinds());

        let runner = MemberRunner {
            executor: Executor::new(control_plane.clone(), pipeline),
            waiter: CompletionWaiter::new(control_plane.clone(), settings.poll_interval),
            control_plane: control_plane.clone(),
            dry_run: settings.dry_run,
        };

        Self {
            control_plane,
            runner,
            settings,
        }
    }

    /// Upgrade a single named service.
    pub async fn upgrade_service(&self, request: &UpgradeRequest) -> Result<Service> {
        if !matches!(request.selector, ServiceSelector::Name(_)) {
            return Err(RanupError::InvalidRequest(
                "a single-service upgrade needs an exact service name".to_string(),
            ));
        }

        let mut report = self.run_fleet(request).await?;
        if let Some(error) = report.compensation_error.take() {
            return Err(error);
        }
        report
            .outcomes
            .into_iter()
            .next()
            .map(|outcome| outcome.result)
            .unwrap_or_else(|| Err(RanupError::NoServicesMatched(request.selector.value().to_string())))
    }

    /// Upgrade every matching service and fold the outcomes into one result.
    pub async fn upgrade_fleet(&self, request: &UpgradeRequest) -> Result<Vec<Service>> {
        self.run_fleet(request).await?.into_result()
    }

    /// Run the upgrade and return every member's outcome.
    ///
    /// Member failures and a rejected compensating action are reported in the
    /// returned [`FleetReport`]. An `Err` means the run could not start
    /// because the request was invalid or the listing failed.
    pub async fn run_fleet(&self, request: &UpgradeRequest) -> Result<FleetReport> {
        request.validate()?;

        let targets = self.targets(&request.selector).await?;
        info!(
            "Upgrading {} service(s) matching {:?} (concurrency: {})",
            targets.len(),
            request.selector.value(),
            self.settings.concurrency
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));
        let mut members = Vec::with_capacity(targets.len());
        let mut handles = Vec::with_capacity(targets.len());

        for target in targets {
            members.push((target.name.clone(), target.snapshot.clone()));
            let member_request = request.for_service(&target.name);
            let runner = self.runner.clone();
            let semaphore = semaphore.clone();

            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                runner.run(target, &member_request).await
            }));
        }

        let results = join_all(handles).await;
        let mut outcomes = Vec::with_capacity(results.len());
        for ((name, snapshot), joined) in members.into_iter().zip(results) {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => UpgradeOutcome {
                    service: name.clone(),
                    phase: MemberPhase::Failed,
                    snapshot,
                    result: Err(RanupError::TaskAborted {
                        service: name,
                        reason: e.to_string(),
                    }),
                },
            };
            if let Err(e) = &outcome.result {
                warn!(service = %outcome.service, phase = %outcome.phase, "Upgrade failed: {}", e);
            }
            outcomes.push(outcome);
        }

        let (compensated, compensation_error) = if request.wait && !self.settings.dry_run {
            self.compensate(&outcomes).await
        } else {
            (Vec::new(), None)
        };

        Ok(FleetReport {
            outcomes,
            compensated,
            compensation_error,
            dry_run: self.settings.dry_run,
        })
    }

    async fn targets(&self, selector: &ServiceSelector) -> Result<Vec<Target>> {
        match selector {
            ServiceSelector::Name(name) => Ok(vec![Target {
                name: name.clone(),
                snapshot: None,
            }]),
            ServiceSelector::Prefix(prefix) => {
                let services = self
                    .control_plane
                    .list_services(&ServiceFilter::services_like(prefix))
                    .await?;
                let mut services = dedup_by_id(services);
                services.retain(|s| s.name.starts_with(prefix.as_str()));
                if services.is_empty() {
                    return Err(RanupError::NoServicesMatched(prefix.clone()));
                }

                Ok(services
                    .into_iter()
                    .map(|s| Target {
                        name: s.name.clone(),
                        snapshot: Some(s),
                    })
                    .collect())
            }
        }
    }

    /// Issue the compensating action for every failed member. The first
    /// rejected action stops the pass and is returned with the members
    /// compensated before it.
    async fn compensate(&self, outcomes: &[UpgradeOutcome]) -> (Vec<String>, Option<RanupError>) {
        let mut compensated = Vec::new();

        for outcome in outcomes.iter().filter(|o| !o.is_success()) {
            let Some(service) = &outcome.snapshot else {
                debug!(service = %outcome.service, "Service was never found, nothing to compensate");
                continue;
            };

            info!(
                service = %service.name,
                "Compensating failed upgrade ({})",
                self.settings.compensation
            );
            let result = match self.settings.compensation {
                Compensation::Cancel => self.control_plane.cancel_upgrade(service).await,
                Compensation::Rollback => self.control_plane.rollback(service).await,
            };
            if let Err(e) = result {
                let error = RanupError::RollbackFailed {
                    service: service.name.clone(),
                    source: Box::new(e),
                };
                warn!("{}", error);
                return (compensated, Some(error));
            }

            compensated.push(outcome.service.clone());
        }

        (compensated, None)
    }
}

fn dedup_by_id(services: Vec<Service>) -> Vec<Service> {
    let mut seen = HashSet::new();
    services
        .into_iter()
        .filter(|s| seen.insert(s.id.clone()))
        .collect()
}

/// Drives one member through its phases.
#[derive(Clone)]
struct MemberRunner {
    executor: Executor,
    waiter: CompletionWaiter,
    control_plane: Arc<dyn ControlPlane>,
    dry_run: bool,
}

struct Progress {
    phase: MemberPhase,
    snapshot: Option<Service>,
}

impl Progress {
    fn enter(&mut self, service: &str, phase: MemberPhase) {
        info!(service = %service, "{} -> {}", self.phase, phase);
        self.phase = phase;
    }
}

impl MemberRunner {
    async fn run(&self, target: Target, request: &UpgradeRequest) -> UpgradeOutcome {
        let mut progress = Progress {
            phase: MemberPhase::Pending,
            snapshot: target.snapshot,
        };

        let result = self.drive(&target.name, request, &mut progress).await;
        if result.is_ok() {
            progress.enter(&target.name, MemberPhase::Done);
        }

        UpgradeOutcome {
            service: target.name,
            phase: progress.phase,
            snapshot: progress.snapshot,
            result,
        }
    }

    async fn drive(
        &self,
        name: &str,
        request: &UpgradeRequest,
        progress: &mut Progress,
    ) -> Result<Service> {
        progress.enter(name, MemberPhase::Validating);
        let plan = self.executor.plan(name, request).await?;
        progress.snapshot = Some(plan.service.clone());

        if self.dry_run {
            return Ok(plan.preview());
        }

        progress.enter(name, MemberPhase::Upgrading);
        let submitted = self.executor.submit(&plan).await?;
        progress.snapshot = Some(submitted.clone());

        if !request.wait {
            return Ok(submitted);
        }

        progress.enter(name, MemberPhase::Waiting);
        let stable = self.waiter.wait(&submitted, request.wait_timeout()).await?;
        progress.snapshot = Some(stable.clone());

        progress.enter(name, MemberPhase::Finishing);
        self.control_plane
            .finish_upgrade(&stable)
            .await
            .map_err(|e| RanupError::Finish {
                service: name.to_string(),
                source: Box::new(e),
            })
    }
}
