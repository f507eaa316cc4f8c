//! ranup - rolling service upgrade CLI tool for Rancher environments.
//!
//! Upgrades one service or a fleet of services matching a name prefix:
//! - Registry tag and required environment validation before any change
//! - Bounded concurrent in-service upgrades
//! - Optional wait, finish and compensation of failed members

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use tracing::{debug, error};

use ranup::config::{Action, Args, Config, UpgradeSettings};
use ranup::output::{print_fleet_report, print_service_state};
use ranup::rancher::ControlPlane;
use ranup::rancher::client::RancherClient;
use ranup::registry::client::{HttpRegistryClient, RegistryAuth};
use ranup::upgrade::Orchestrator;
use ranup::upgrade::envfile::{EnvFile, RequiredKeySource};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    if let Err(e) = init_tracing(&args.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    debug!("Starting ranup - Rancher service upgrade tool");

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Main application logic.
async fn run(args: Args) -> Result<()> {
    let config = Config::from_args(args)?;

    let client = RancherClient::new(
        &config.rancher.url,
        &config.rancher.access_key,
        config.rancher.secret_key,
        config.request_timeout,
    )?;
    let control_plane: Arc<dyn ControlPlane> = Arc::new(client);

    match config.action {
        Action::Upgrade(settings) => {
            run_upgrade(control_plane, *settings, config.request_timeout).await
        }
        Action::FinishUpgrade(name) => {
            let service = control_plane.service_by_name(&name).await?;
            let service = control_plane.finish_upgrade(&service).await?;
            print_service_state("Finished upgrade of", &service);
            Ok(())
        }
        Action::CancelUpgrade(name) => {
            let service = control_plane.service_by_name(&name).await?;
            let service = control_plane.cancel_upgrade(&service).await?;
            print_service_state("Cancelled upgrade of", &service);
            Ok(())
        }
        Action::Rollback(name) => {
            let service = control_plane.service_by_name(&name).await?;
            let service = control_plane.rollback(&service).await?;
            print_service_state("Rolled back", &service);
            Ok(())
        }
    }
}

async fn run_upgrade(
    control_plane: Arc<dyn ControlPlane>,
    settings: UpgradeSettings,
    request_timeout: Duration,
) -> Result<()> {
    let UpgradeSettings {
        request,
        env_file,
        registry,
        orchestrator,
    } = settings;

    let auth = registry.username.map(|username| RegistryAuth {
        username,
        password: registry
            .password
            .unwrap_or_else(|| SecretString::from(String::new())),
    });
    let registry = Arc::new(HttpRegistryClient::new(&registry.url, auth, request_timeout)?);

    let required_keys = match env_file {
        Some(path) => {
            let env_file: Arc<dyn RequiredKeySource> = Arc::new(EnvFile::load(path)?);
            Some(env_file)
        }
        None => None,
    };

    let orchestrator = Orchestrator::new(control_plane, registry, required_keys, orchestrator);

    let spinner = create_spinner(format!(
        "Upgrading services matching {}...",
        request.selector.value().bold()
    ));
    let report = orchestrator.run_fleet(&request).await;
    spinner.finish_and_clear();

    let report = report?;
    print_fleet_report(&report);
    report.into_result()?;
    Ok(())
}

/// Initialize tracing subscriber.
fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to initialize log filter: {}", e))?;

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}

fn create_spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
