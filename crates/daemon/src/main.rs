//! Daemon entry point: wires the engine together and runs the scheduler
//! until interrupted.

use std::sync::Arc;

use cronhost_engine::{
    EngineConfig, EnvironmentManager, Executor, LogAlerter, RunningSet, Scheduler,
};
use cronhost_events::{InstallChannels, OutputChannels};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cronhost=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(EngineConfig::from_env());
    config.ensure_directories()?;
    info!(
        scripts_dir = %config.scripts_dir.display(),
        envs_dir = %config.envs_dir.display(),
        "starting cronhost"
    );

    let pool = cronhost_db::connect(&config.database_url).await?;

    let output_channels = Arc::new(OutputChannels::new());
    let install_channels = Arc::new(InstallChannels::new());
    let running = RunningSet::new();
    let environment = Arc::new(EnvironmentManager::new(
        config.clone(),
        install_channels,
        running.clone(),
    ));
    let executor = Executor::new(
        pool.clone(),
        config,
        environment,
        output_channels,
        running,
        Arc::new(LogAlerter),
    );

    let stale = executor.cleanup_stale_executions().await?;
    if stale > 0 {
        info!(count = stale, "cleaned up executions from a previous run");
    }

    let scheduler = Scheduler::new(pool, executor);
    let jobs = scheduler.reload_all().await?;
    info!(jobs, "scheduler ready");

    tokio::select! {
        _ = scheduler.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, shutting down");
        }
    }
    Ok(())
}
