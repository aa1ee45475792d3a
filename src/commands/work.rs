use std::{process, sync::Arc};

use sea_orm_migration::MigratorTrait;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    database::migrations::Migrator,
    jobs::{
        job_registry::JobRegistry, job_supervisor::job_supervisor, scheduled_job::ScheduledJob,
        store::PostgresJobStore,
    },
};

use super::connect_or_exit;

pub async fn handle_work_command(
    config: Config,
    job_registry: JobRegistry,
    job_schedule: Vec<ScheduledJob>,
) {
    let db = connect_or_exit(&config).await;

    if config.database.migrate_on_start {
        info!("🗄️ Applying pending migrations");
        if let Err(e) = Migrator::up(&db, None).await {
            error!("❌ Database migrations failed: {}", e);
            process::exit(1);
        }
    }
    info!("✅ Database is ready!");

    let mut job_types: Vec<_> = job_registry.job_names().copied().collect();
    job_types.sort_unstable();
    info!("📋 Registered job types: {:?}", job_types);

    let store = PostgresJobStore::new(db.clone(), config.jobs.retry.policy());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut supervisor = tokio::spawn(job_supervisor(
        config.jobs,
        Arc::new(store),
        Some(db.clone()),
        job_registry,
        job_schedule,
        shutdown_rx,
    ));

    tokio::select! {
        () = shutdown_signal() => {
            info!("🛑 Shutdown requested, draining workers");
            let _ = shutdown_tx.send(true);
            report(supervisor.await);
        }
        result = &mut supervisor => report(result),
    }

    if let Err(e) = db.close().await {
        warn!("Failed to close database pool: {}", e);
    }
}

fn report(
    result: Result<Result<(), crate::config::ConfigError>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(())) => info!("👋 Workers stopped"),
        Ok(Err(e)) => {
            error!("❌ Invalid jobs configuration: {}", e);
            process::exit(1);
        }
        Err(e) => {
            error!("💥 Job supervisor crashed: {}", e);
            process::exit(1);
        }
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
