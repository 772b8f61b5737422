// SeedPod seeder: holds files, serves byte ranges, accepts uploads and pulls replicas.

mod config;
mod service;
mod tracker;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use seedpod_core::storage::Storage;
use seedpod_core::{CallPolicy, Dispatcher};

use crate::service::SeederService;
use crate::tracker::TrackerLink;

#[derive(Parser, Debug)]
#[command(name = "seedpod-seeder", version, about = "SeedPod seeder")]
struct Args {
    /// Config file (TOML). Defaults to ~/.config/seedpod/seeder.toml, then /etc/seedpod/seeder.toml.
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Storage directory, overriding the config.
    #[arg(long)]
    storage_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut cfg = config::load(args.config.as_deref())?;
    if let Some(dir) = args.storage_dir {
        cfg.storage_dir = dir;
    }
    let address = match cfg.advertise {
        Some(a) => a,
        None => detect_address()?,
    };

    let storage = Storage::open(&cfg.storage_dir)
        .await
        .with_context(|| format!("opening storage {}", cfg.storage_dir.display()))?;
    let policy = CallPolicy::default()
        .with_request_timeout(cfg.request_timeout())
        .with_retries(cfg.retries);

    // Listen before registering so the first health check finds us.
    let dispatcher = Dispatcher::bind(SocketAddr::from(([0, 0, 0, 0], cfg.port)), None).await?;
    let mut tracker = TrackerLink::new(cfg.tracker, policy);
    tracker
        .register(address, storage.catalog())
        .await
        .with_context(|| format!("registering {} with tracker {}", address, tracker.addr()))?;
    tracing::info!(%address, tracker = %cfg.tracker, files = storage.catalog().len(), "registered");

    let mut service = SeederService::new(storage, tracker, address, cfg.port, policy);
    dispatcher.run_until(&mut service, shutdown_signal()).await;

    match service.sign_out().await {
        Ok(()) => tracing::info!(%address, files = service.storage().catalog().len(), "signed out"),
        Err(e) => tracing::warn!(%address, error = %e, "signout failed"),
    }
    Ok(())
}

/// Primary non-loopback IPv4 address of this host.
fn detect_address() -> anyhow::Result<Ipv4Addr> {
    match local_ip_address::local_ip().context("detecting local address")? {
        IpAddr::V4(ip) => Ok(ip),
        IpAddr::V6(ip) => anyhow::bail!("primary address {} is not IPv4; set `advertise`", ip),
    }
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
