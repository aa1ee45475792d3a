use std::{env, str::FromStr as _};

use clap::Parser as _;
use config_rs::Config as ConfigRs;
use tracing::{debug, trace};

use crate::{
    app_info::AppInfo,
    cli::{Cli, Commands},
    commands::{enqueue, inspect, migrate, reap, version, work},
    config::Config,
    environment::Environment,
    jobs::{job_registry::JobRegistry, scheduled_job::ScheduledJob},
    setup_tracing::setup_tracing_for_command,
};

const ENVIRONMENT_VARIABLE: &str = "APP_ENVIRONMENT";

/// Everything a binary hands over to run the job system.
pub struct BootConfig {
    pub app_info: AppInfo,
    pub job_registry: JobRegistry,
    pub job_schedule: Vec<ScheduledJob>,
}

impl BootConfig {
    #[must_use]
    pub const fn new(
        app_info: AppInfo,
        job_registry: JobRegistry,
        job_schedule: Vec<ScheduledJob>,
    ) -> Self {
        Self {
            app_info,
            job_registry,
            job_schedule,
        }
    }
}

pub async fn boot(config: BootConfig) {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Version)) {
        version::print_version_info(config.app_info);
        return;
    }

    let environment = set_environment();

    let app_config = match read_config(&environment) {
        Ok(app_config) => app_config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration for {environment}: {e}");
            std::process::exit(1);
        }
    };

    // Set up tracing with appropriate level based on command
    setup_tracing_for_command(cli.command.as_ref(), &app_config.tracing.log_level);

    debug!("Environment set to: {:?}", environment);
    trace!("Configuration loaded: {:?}", app_config);

    handle_command(app_config, cli, config.job_registry, config.job_schedule, config.app_info).await;
}

#[must_use]
pub fn set_environment() -> Environment {
    env::var(ENVIRONMENT_VARIABLE)
        .ok()
        .and_then(|s| Environment::from_str(&s).ok())
        .unwrap_or_default()
}

/// Read `config/{environment}.toml`, then apply `APP_*` overrides.
///
/// Nested keys use a double underscore, e.g. `APP_DATABASE__URL` or
/// `APP_JOBS__RETRY__BASE_DELAY_MS`.
pub fn read_config(environment: &Environment) -> Result<Config, config_rs::ConfigError> {
    let config_file_name = format!("config/{environment}");

    trace!("Reading configuration from: {}", config_file_name);

    ConfigRs::builder()
        .add_source(config_rs::File::with_name(&config_file_name))
        .add_source(config_rs::Environment::with_prefix("APP").separator("__"))
        .build()?
        .try_deserialize()
}

pub async fn handle_command(
    config: Config,
    cli: Cli,
    job_registry: JobRegistry,
    job_schedule: Vec<ScheduledJob>,
    app_info: AppInfo,
) {
    match cli.command {
        Some(Commands::Migrate { action }) => {
            migrate::handle_migrate_command(&config, action).await;
        }
        Some(Commands::Enqueue {
            job_type,
            queue,
            payload,
            max_tries,
            delay_seconds,
        }) => {
            let request = enqueue::EnqueueRequest {
                job_type,
                queue,
                payload,
                max_tries,
                delay_seconds,
            };
            enqueue::handle_enqueue_command(&config, request).await;
        }
        Some(Commands::Stats { queue }) => {
            inspect::handle_stats_command(&config, queue.as_deref()).await;
        }
        Some(Commands::List {
            queue,
            status,
            limit,
        }) => {
            inspect::handle_list_command(&config, queue, status, limit).await;
        }
        Some(Commands::Show { job_id }) => {
            inspect::handle_show_command(&config, job_id).await;
        }
        Some(Commands::Reap) => {
            reap::handle_reap_command(&config).await;
        }
        Some(Commands::Version) => {
            version::print_version_info(app_info);
        }
        Some(Commands::Work) | None => {
            work::handle_work_command(config, job_registry, job_schedule).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_test_configuration() {
        let config = read_config(&Environment::Test).unwrap();

        assert!(config.database.url.starts_with("postgres://"));
        assert!(config.jobs.validate().is_ok());
    }
}
