//! Idle-tick work: drop seeders that stop answering, then top up replicas.

use std::net::{Ipv4Addr, SocketAddr};

use seedpod_core::rebalance::{self, ReplicationTask};
use seedpod_core::{CallPolicy, FileMetadata, NodeRegistry, OpError, PeerClient, Request};

/// How the tracker reaches seeders during maintenance.
#[derive(Debug, Clone, Copy)]
pub struct MaintenancePolicy {
    pub seeder_port: u16,
    pub ping: CallPolicy,
    pub replicate: CallPolicy,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub removed: Vec<Ipv4Addr>,
    pub replicated: usize,
    pub failed: usize,
}

/// Health check followed by one rebalance pass over the survivors.
pub async fn run_pass(registry: &mut NodeRegistry, policy: &MaintenancePolicy) -> PassReport {
    let removed = health_check(registry, policy).await;
    let (replicated, failed) = rebalance(registry, policy).await;
    PassReport {
        removed,
        replicated,
        failed,
    }
}

/// Ping every seeder once; any failure removes it.
pub async fn health_check(registry: &mut NodeRegistry, policy: &MaintenancePolicy) -> Vec<Ipv4Addr> {
    let mut removed = Vec::new();
    for address in registry.addresses() {
        let mut client = PeerClient::new(SocketAddr::from((address, policy.seeder_port)), policy.ping);
        if let Err(e) = client.call_ok(&Request::ping("health check")).await {
            tracing::warn!(seeder = %address, error = %e, "seeder failed health check, removing");
            registry.remove(address);
            removed.push(address);
        }
    }
    removed
}

/// Send each planned pull to its target. Returns (succeeded, failed).
pub async fn rebalance(registry: &mut NodeRegistry, policy: &MaintenancePolicy) -> (usize, usize) {
    let tasks = rebalance::plan(registry);
    let mut ok = 0;
    let mut failed = 0;
    for task in tasks {
        match replicate(&task, policy).await {
            Ok(meta) => {
                match registry.record_owner(task.target, task.file_id.clone(), meta) {
                    Ok(()) => ok += 1,
                    Err(e) => {
                        tracing::warn!(file = %task.file_id, target = %task.target, error = %e, "replica not recorded");
                        failed += 1;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(file = %task.file_id, target = %task.target, error = %e, "replication failed, skipping");
                failed += 1;
            }
        }
    }
    (ok, failed)
}

/// Ask the target to pull the file. Returns the entry it stored the copy under.
async fn replicate(task: &ReplicationTask, policy: &MaintenancePolicy) -> Result<FileMetadata, OpError> {
    tracing::debug!(file = %task.file_id, target = %task.target, sources = ?task.sources, "requesting replica");
    let request = Request::replicate(&task.file_id, &task.file_name, task.size, &task.sources)?;
    let mut client = PeerClient::new(SocketAddr::from((task.target, policy.seeder_port)), policy.replicate);
    let mut listed = client.call_ok(&request).await?.into_listing()?;
    let meta = listed.remove(&task.file_id).ok_or_else(|| {
        OpError::Malformed(format!("replica reply does not list {}", task.file_id))
    })?;
    if meta.size != task.size {
        return Err(OpError::Malformed(format!(
            "replica of {} stored with {} bytes, expected {}",
            task.file_id, meta.size, task.size
        )));
    }
    Ok(meta)
}
