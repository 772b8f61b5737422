//! Replication planner: which seeder should pull which under-replicated file.
//! Pure; the tracker host performs the calls.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use crate::file::FileId;
use crate::registry::NodeRegistry;

/// Copies each file should have with `active_nodes` seeders online:
/// `ceil(ln n)`, and zero for one node or none.
pub fn required_replicas(active_nodes: usize) -> usize {
    if active_nodes <= 1 {
        return 0;
    }
    (active_nodes as f64).ln().ceil() as usize
}

/// One pull command: `target` should fetch the file from `sources`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationTask {
    pub file_id: FileId,
    pub file_name: String,
    pub size: u64,
    pub sources: Vec<Ipv4Addr>,
    pub target: Ipv4Addr,
}

struct FileGroup {
    file_name: String,
    size: u64,
    owners: Vec<Ipv4Addr>,
}

/// Plan one rebalance pass over the surviving nodes.
///
/// Targets are chosen least-loaded first among nodes not already holding the
/// file, earliest registered on ties. A chosen target's load grows by the
/// file size so later files in the same pass see it.
pub fn plan(registry: &NodeRegistry) -> Vec<ReplicationTask> {
    let required = required_replicas(registry.len());
    if required == 0 {
        return vec![];
    }

    let mut groups: BTreeMap<FileId, FileGroup> = BTreeMap::new();
    for node in registry.nodes() {
        for (id, meta) in &node.catalog {
            groups
                .entry(id.clone())
                .or_insert_with(|| FileGroup {
                    file_name: meta.name.clone(),
                    size: meta.size,
                    owners: Vec::new(),
                })
                .owners
                .push(node.address);
        }
    }

    let mut loads: Vec<(Ipv4Addr, u64)> = registry
        .nodes()
        .iter()
        .map(|n| (n.address, n.load()))
        .collect();

    let mut tasks = Vec::new();
    for (file_id, group) in groups {
        if group.owners.len() >= required {
            continue;
        }
        let wanted = required - group.owners.len();
        for target in pick_targets(&loads, &group.owners, wanted) {
            if let Some(entry) = loads.iter_mut().find(|(a, _)| *a == target) {
                entry.1 = entry.1.saturating_add(group.size);
            }
            tasks.push(ReplicationTask {
                file_id: file_id.clone(),
                file_name: group.file_name.clone(),
                size: group.size,
                sources: group.owners.clone(),
                target,
            });
        }
    }
    tasks
}

/// Least-loaded `wanted` nodes; owners count as infinitely loaded and are never picked.
fn pick_targets(loads: &[(Ipv4Addr, u64)], owners: &[Ipv4Addr], wanted: usize) -> Vec<Ipv4Addr> {
    let mut candidates: Vec<(Ipv4Addr, u64)> = loads
        .iter()
        .copied()
        .filter(|(a, _)| !owners.contains(a))
        .collect();
    // Stable sort keeps registration order among equal loads.
    candidates.sort_by_key(|(_, load)| *load);
    candidates.into_iter().take(wanted).map(|(a, _)| a).collect()
}
