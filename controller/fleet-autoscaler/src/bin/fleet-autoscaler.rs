//! Fleet Autoscaler binary - loads the configuration and runs the scheduler

use anyhow::{Context, Result};
use clap::Parser;
use fleet_autoscaler::{Args, AutoscalerConfig, ComponentRegistry, Scheduler};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(level: &str, json: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .with_context(|| format!("Invalid logging level: {}", level))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {}", e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AutoscalerConfig::load(&args)
        .with_context(|| format!("Failed to load configuration from {}", args.config.display()))?;

    init_tracing(&config.logging.level, args.log_json)?;

    info!("Starting Fleet Autoscaler");
    info!(
        config = %args.config.display(),
        interval = %humantime::format_duration(config.interval),
        managers = config.managers.len(),
        once = args.once,
        "Configuration loaded"
    );

    let managers = ComponentRegistry::new()
        .build_all(&config)
        .context("Failed to build managers")?;
    if managers.is_empty() {
        warn!("No managers configured, nothing to scale");
    }

    let scheduler = Scheduler::new(managers, config.interval);

    if args.once {
        let reports = scheduler.run_cycle().await;
        let failed = reports.iter().filter(|r| r.result.is_err()).count();
        if failed > 0 {
            anyhow::bail!("{} of {} managers failed their cycle", failed, reports.len());
        }
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
            // Keep the sender alive so the scheduler does not stop on its own.
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;
    info!("Fleet Autoscaler exited normally");
    Ok(())
}
