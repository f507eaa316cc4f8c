//! CLI configuration and argument parsing.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};
use secrecy::SecretString;

use crate::error::{RanupError, Result};
use crate::upgrade::fleet::DEFAULT_CONCURRENCY;
use crate::upgrade::waiter::DEFAULT_POLL_INTERVAL;
use crate::upgrade::{Compensation, OrchestratorSettings, ServiceSelector, UpgradeRequest};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Rolling service upgrade CLI tool for Rancher environments.
///
/// Validates requested image tags against the registry, submits in-service
/// upgrades for one service or every service matching a name prefix, and
/// optionally waits for them to finish.
#[derive(Parser, Debug)]
#[command(name = "ranup")]
#[command(about = "Rolling service upgrade CLI tool for Rancher environments")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Rancher environment API endpoint
    #[arg(long, env = "CATTLE_URL", global = true)]
    pub url: Option<String>,

    /// Rancher API access key
    #[arg(long, env = "CATTLE_ACCESS_KEY", global = true)]
    pub access_key: Option<String>,

    /// Rancher API secret key
    #[arg(long, env = "CATTLE_SECRET_KEY", hide_env_values = true, global = true)]
    pub secret_key: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long, default_value = "30", value_name = "SECONDS", global = true)]
    pub request_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", env = "RANUP_LOG_LEVEL", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage Rancher services
    #[command(subcommand)]
    Service(ServiceCommand),
}

#[derive(Subcommand, Debug)]
pub enum ServiceCommand {
    /// Upgrade one service, or every service matching a name prefix
    Upgrade(Box<UpgradeArgs>),
    /// Finish a completed upgrade, removing the old containers
    UpgradeFinish(TargetArgs),
    /// Cancel an in-progress upgrade
    UpgradeCancel(TargetArgs),
    /// Roll a service back to its previous launch config
    Rollback(TargetArgs),
}

#[derive(ClapArgs, Debug)]
pub struct TargetArgs {
    /// Exact service name
    #[arg(long)]
    pub service: String,
}

#[derive(ClapArgs, Debug)]
pub struct UpgradeArgs {
    /// Exact service name
    #[arg(long, conflicts_with = "service_like", required_unless_present = "service_like")]
    pub service: Option<String>,

    /// Upgrade every service whose name starts with this prefix
    #[arg(long, value_name = "PREFIX")]
    pub service_like: Option<String>,

    /// Dotenv file listing the environment keys every service must define
    #[arg(long, value_name = "PATH")]
    pub env_file: Option<PathBuf>,

    /// Environment override for the primary container (repeatable)
    #[arg(long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// New tag (or repository:tag) for the primary container
    #[arg(long)]
    pub runtime_tag: Option<String>,

    /// New tag (or repository:tag) for the first sidekick container
    #[arg(long)]
    pub code_tag: Option<String>,

    /// Seconds between starting new containers and stopping old ones (0 uses the default)
    #[arg(long, default_value = "10", value_name = "SECONDS")]
    pub interval: u64,

    /// Wait for each upgrade to complete, then finish it
    #[arg(long, default_value = "false")]
    pub wait: bool,

    /// Maximum number of services upgraded at the same time
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,

    /// Action taken against services whose upgrade failed (with --wait)
    #[arg(long, value_enum, default_value_t = Compensation::Cancel)]
    pub on_failure: Compensation,

    /// Validate and show the resolved upgrade without submitting it
    #[arg(long, default_value = "false")]
    pub dry_run: bool,

    /// Docker registry used to confirm requested tags exist
    #[arg(long, env = "DOCKER_REGISTRY_URL")]
    pub registry_url: String,

    /// Docker registry username
    #[arg(long, env = "DOCKER_REGISTRY_USERNAME")]
    pub registry_username: Option<String>,

    /// Docker registry password
    #[arg(long, env = "DOCKER_REGISTRY_PASSWORD", hide_env_values = true)]
    pub registry_password: Option<String>,
}

/// Rancher API endpoint and credentials.
#[derive(Debug)]
pub struct RancherSettings {
    pub url: String,
    pub access_key: String,
    pub secret_key: SecretString,
}

#[derive(Debug)]
pub struct RegistrySettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
}

#[derive(Debug)]
pub struct UpgradeSettings {
    pub request: UpgradeRequest,
    pub env_file: Option<PathBuf>,
    pub registry: RegistrySettings,
    pub orchestrator: OrchestratorSettings,
}

/// What the invocation asks for.
#[derive(Debug)]
pub enum Action {
    Upgrade(Box<UpgradeSettings>),
    FinishUpgrade(String),
    CancelUpgrade(String),
    Rollback(String),
}

/// Application configuration derived from CLI args.
#[derive(Debug)]
pub struct Config {
    pub rancher: RancherSettings,
    pub request_timeout: Duration,
    pub log_level: String,
    pub action: Action,
}

impl Config {
    /// Create config from CLI arguments, rejecting settings that can never work.
    pub fn from_args(args: Args) -> Result<Self> {
        let rancher = RancherSettings {
            url: required(args.url, "--url / CATTLE_URL")?,
            access_key: required(args.access_key, "--access-key / CATTLE_ACCESS_KEY")?,
            secret_key: SecretString::from(required(
                args.secret_key,
                "--secret-key / CATTLE_SECRET_KEY",
            )?),
        };

        let action = match args.command {
            Command::Service(ServiceCommand::Upgrade(upgrade)) => {
                Action::Upgrade(Box::new(upgrade_settings(*upgrade)?))
            }
            Command::Service(ServiceCommand::UpgradeFinish(t)) => Action::FinishUpgrade(t.service),
            Command::Service(ServiceCommand::UpgradeCancel(t)) => Action::CancelUpgrade(t.service),
            Command::Service(ServiceCommand::Rollback(t)) => Action::Rollback(t.service),
        };

        Ok(Self {
            rancher,
            request_timeout: Duration::from_secs(args.request_timeout),
            log_level: args.log_level,
            action,
        })
    }
}

fn required(value: Option<String>, name: &str) -> Result<String> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| RanupError::InvalidRequest(format!("{} is required", name)))
}

fn upgrade_settings(args: UpgradeArgs) -> Result<UpgradeSettings> {
    let selector = match (args.service, args.service_like) {
        (Some(name), None) => ServiceSelector::Name(name),
        (None, Some(prefix)) => ServiceSelector::Prefix(prefix),
        _ => {
            return Err(RanupError::InvalidRequest(
                "exactly one of --service or --service-like is required".to_string(),
            ));
        }
    };

    if args.concurrency == 0 {
        return Err(RanupError::InvalidRequest(
            "--concurrency must be at least 1".to_string(),
        ));
    }

    let mut request = UpgradeRequest::new(selector)
        .with_interval(Duration::from_secs(args.interval))
        .with_wait(args.wait);
    request.runtime_tag = args.runtime_tag;
    request.code_tag = args.code_tag;
    request.env = args.env;
    request.validate()?;

    Ok(UpgradeSettings {
        request,
        env_file: args.env_file,
        registry: RegistrySettings {
            url: args.registry_url,
            username: args.registry_username,
            password: args.registry_password.map(SecretString::from),
        },
        orchestrator: OrchestratorSettings {
            concurrency: args.concurrency,
            poll_interval: DEFAULT_POLL_INTERVAL,
            compensation: args.on_failure,
            dry_run: args.dry_run,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    const CONNECTION: [&str; 7] = [
        "ranup",
        "--url",
        "http://rancher.local/v1/projects/1a5",
        "--access-key",
        "access",
        "--secret-key",
        "secret",
    ];

    fn parse(rest: &[&str]) -> std::result::Result<Args, clap::Error> {
        Args::try_parse_from(CONNECTION.iter().chain(rest).copied())
    }

    fn upgrade(rest: &[&str]) -> UpgradeSettings {
        let mut argv = vec!["service", "upgrade", "--registry-url", "https://registry.local"];
        argv.extend_from_slice(rest);
        match Config::from_args(parse(&argv).unwrap()).unwrap().action {
            Action::Upgrade(settings) => *settings,
            other => panic!("expected upgrade, got {:?}", other),
        }
    }

    #[test]
    fn test_upgrade_by_name_defaults() {
        let settings = upgrade(&["--service", "api", "--runtime-tag", "2.0"]);

        let request = &settings.request;
        assert_eq!(request.selector, ServiceSelector::Name("api".to_string()));
        assert_eq!(request.runtime_tag(), Some("2.0"));
        assert_eq!(request.interval, Duration::from_secs(10));
        assert!(!request.wait);
        assert_eq!(settings.orchestrator.concurrency, 8);
        assert_eq!(settings.orchestrator.compensation, Compensation::Cancel);
        assert!(!settings.orchestrator.dry_run);
        assert!(settings.env_file.is_none());
    }

    #[test]
    fn test_upgrade_fleet_flags() {
        let settings = upgrade(&[
            "--service-like",
            "api-",
            "--code-tag",
            "acme/code:3.1",
            "--env",
            "MODE=blue",
            "--env",
            "DEBUG=",
            "--interval",
            "2",
            "--wait",
            "--concurrency",
            "3",
            "--on-failure",
            "rollback",
            "--env-file",
            "/etc/ranup/.env",
            "--dry-run",
        ]);

        let request = &settings.request;
        assert_eq!(request.selector, ServiceSelector::Prefix("api-".to_string()));
        assert_eq!(request.code_tag(), Some("acme/code:3.1"));
        assert_eq!(request.env, vec!["MODE=blue", "DEBUG="]);
        assert_eq!(request.wait_timeout(), Duration::from_secs(40));
        assert!(request.wait);
        assert_eq!(settings.orchestrator.concurrency, 3);
        assert_eq!(settings.orchestrator.compensation, Compensation::Rollback);
        assert!(settings.orchestrator.dry_run);
        assert_eq!(settings.env_file, Some(PathBuf::from("/etc/ranup/.env")));
    }

    #[test]
    fn test_service_and_service_like_conflict() {
        let err = parse(&[
            "service",
            "upgrade",
            "--registry-url",
            "https://registry.local",
            "--service",
            "api",
            "--service-like",
            "api-",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);

        let err = parse(&["service", "upgrade", "--registry-url", "https://registry.local"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_malformed_env_rejected_up_front() {
        let args = parse(&[
            "service",
            "upgrade",
            "--registry-url",
            "https://registry.local",
            "--service",
            "api",
            "--env",
            "NOVALUE",
        ])
        .unwrap();

        let err = Config::from_args(args).unwrap_err();
        assert!(matches!(err, RanupError::InvalidEnv(_)));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let args = parse(&[
            "service",
            "upgrade",
            "--registry-url",
            "https://registry.local",
            "--service-like",
            "api-",
            "--concurrency",
            "0",
        ])
        .unwrap();

        assert!(matches!(
            Config::from_args(args),
            Err(RanupError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_zero_interval_falls_back_to_default() {
        let settings = upgrade(&["--service", "api", "--interval", "0", "--wait"]);

        assert_eq!(settings.request.interval, Duration::from_secs(10));
        assert_eq!(settings.request.wait_timeout(), Duration::from_secs(200));
    }

    #[test]
    fn test_upgrade_args_are_boxed() {
        assert!(std::mem::size_of::<ServiceCommand>() <= 2 * std::mem::size_of::<TargetArgs>());

        match parse(&["service", "upgrade", "--registry-url", "https://r", "--service", "api"])
            .unwrap()
            .command
        {
            Command::Service(ServiceCommand::Upgrade(args)) => {
                assert_eq!(args.service.as_deref(), Some("api"))
            }
            other => panic!("expected upgrade, got {:?}", other),
        }
    }

    #[test]
    fn test_lifecycle_subcommands() {
        for (cmd, expected) in [
            ("upgrade-finish", "finish"),
            ("upgrade-cancel", "cancel"),
            ("rollback", "rollback"),
        ] {
            let config =
                Config::from_args(parse(&["service", cmd, "--service", "api"]).unwrap()).unwrap();
            let (kind, name) = match config.action {
                Action::FinishUpgrade(name) => ("finish", name),
                Action::CancelUpgrade(name) => ("cancel", name),
                Action::Rollback(name) => ("rollback", name),
                Action::Upgrade(_) => ("upgrade", String::new()),
            };
            assert_eq!(kind, expected);
            assert_eq!(name, "api");
        }
    }

    #[test]
    fn test_connection_settings() {
        let config = Config::from_args(
            parse(&["service", "rollback", "--service", "api", "--request-timeout", "5"])
                .unwrap(),
        )
        .unwrap();

        assert_eq!(config.rancher.url, "http://rancher.local/v1/projects/1a5");
        assert_eq!(config.rancher.access_key, "access");
        assert_eq!(config.rancher.secret_key.expose_secret(), "secret");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_registry_credentials_are_secret() {
        let settings = upgrade(&[
            "--service",
            "api",
            "--registry-username",
            "deploy",
            "--registry-password",
            "hunter2",
        ]);

        let password = settings.registry.password.unwrap();
        assert_eq!(password.expose_secret(), "hunter2");
        assert!(!format!("{:?}", password).contains("hunter2"));
        assert_eq!(settings.registry.username.as_deref(), Some("deploy"));
    }
}
