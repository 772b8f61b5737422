// SeedPod tracker: seeder registry, owner lookup, upload placement, replica upkeep.

mod config;
mod maintenance;
mod service;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use seedpod_core::{CallPolicy, Dispatcher};

use crate::maintenance::MaintenancePolicy;
use crate::service::TrackerService;

#[derive(Parser, Debug)]
#[command(name = "seedpod-tracker", version, about = "SeedPod tracker")]
struct Args {
    /// Config file (TOML). Defaults to ~/.config/seedpod/tracker.toml, then /etc/seedpod/tracker.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cfg = config::load(args.config.as_deref())?;
    tracing::debug!(?cfg, "config loaded");

    let policy = MaintenancePolicy {
        seeder_port: cfg.seeder_port,
        ping: CallPolicy::single_attempt(cfg.ping_timeout()),
        replicate: CallPolicy::default()
            .with_request_timeout(cfg.replicate_timeout())
            .with_retries(0),
    };
    let mut service = TrackerService::new(policy);
    let dispatcher = Dispatcher::bind(cfg.bind, Some(cfg.maintenance_interval())).await?;
    dispatcher.run_until(&mut service, shutdown_signal()).await;
    tracing::info!(seeders = service.registry().len(), "tracker stopped");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
