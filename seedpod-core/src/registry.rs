//! Node registry: seeder address -> file catalog, in registration order.

use std::net::Ipv4Addr;

use crate::error::OpError;
use crate::file::{catalog_load, validate_catalog, validate_entry, Catalog, FileId, FileMetadata};
use crate::protocol::{parse_address, OwnerSet};

/// One registered seeder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub address: Ipv4Addr,
    pub catalog: Catalog,
}

impl Node {
    /// Bytes held, used for least-loaded placement.
    pub fn load(&self) -> u64 {
        catalog_load(&self.catalog)
    }

    pub fn owns(&self, file_id: &FileId) -> bool {
        self.catalog.contains_key(file_id)
    }
}

/// Sole owner of all node records. Owner sets are computed on demand from
/// the catalogs, never cached.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Vec<Node>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes in registration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        self.nodes.iter().map(|n| n.address).collect()
    }

    pub fn get(&self, address: Ipv4Addr) -> Option<&Node> {
        self.nodes.iter().find(|n| n.address == address)
    }

    fn get_mut(&mut self, address: Ipv4Addr) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.address == address)
    }

    pub fn register(&mut self, address: &str, catalog: Catalog) -> Result<(), OpError> {
        let address = parse_address(address)?;
        validate_catalog(&catalog)?;
        if self.get(address).is_some() {
            return Err(OpError::validation(format!("seeder {} already registered", address)));
        }
        self.nodes.push(Node { address, catalog });
        Ok(())
    }

    /// Replace a node's catalog wholesale.
    pub fn update(&mut self, address: &str, catalog: Catalog) -> Result<(), OpError> {
        let address = parse_address(address)?;
        validate_catalog(&catalog)?;
        let node = self
            .get_mut(address)
            .ok_or_else(|| unknown_node(address))?;
        node.catalog = catalog;
        Ok(())
    }

    pub fn signout(&mut self, address: &str) -> Result<(), OpError> {
        let address = parse_address(address)?;
        if self.remove(address) {
            Ok(())
        } else {
            Err(unknown_node(address))
        }
    }

    /// Drop a node. Returns false if it was not registered.
    pub fn remove(&mut self, address: Ipv4Addr) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n.address != address);
        self.nodes.len() != before
    }

    /// Union of all catalogs; on a FileId held by several nodes the entry of
    /// the earliest registered node wins.
    pub fn list(&self) -> Catalog {
        let mut all = Catalog::new();
        for node in &self.nodes {
            for (id, meta) in &node.catalog {
                all.entry(id.clone()).or_insert_with(|| meta.clone());
            }
        }
        all
    }

    /// Every node holding `file_id`; name and size come from the first one.
    pub fn owners(&self, file_id: &FileId) -> Result<OwnerSet, OpError> {
        let mut holders = self
            .nodes
            .iter()
            .filter_map(|n| n.catalog.get(file_id).map(|m| (n.address, m)));
        let (first, meta) = holders
            .next()
            .ok_or_else(|| OpError::not_found(format!("file {} not found", file_id)))?;
        let mut owners = vec![first];
        owners.extend(holders.map(|(a, _)| a));
        Ok(OwnerSet {
            file_id: file_id.clone(),
            file_name: meta.name.clone(),
            size: meta.size,
            owners,
        })
    }

    /// Pick the node a new file should be uploaded to: the one holding the
    /// fewest bytes, earliest registered on ties.
    pub fn reserve_upload(&self, file_id: &FileId, size: u64) -> Result<Ipv4Addr, OpError> {
        if self.nodes.iter().any(|n| n.owns(file_id)) {
            return Err(OpError::validation(format!("file {} already exists", file_id)));
        }
        let target = self
            .nodes
            .iter()
            .min_by_key(|n| n.load())
            .ok_or_else(|| OpError::not_found("no seeders available"))?;
        tracing::debug!(file = %file_id, size, target = %target.address, "upload slot assigned");
        Ok(target.address)
    }

    /// Record that `address` now holds a copy of `file_id`.
    pub fn record_owner(
        &mut self,
        address: Ipv4Addr,
        file_id: FileId,
        meta: FileMetadata,
    ) -> Result<(), OpError> {
        validate_entry(&file_id, &meta)?;
        let node = self
            .get_mut(address)
            .ok_or_else(|| unknown_node(address))?;
        node.catalog.insert(file_id, meta);
        Ok(())
    }
}

fn unknown_node(address: Ipv4Addr) -> OpError {
    OpError::validation(format!("seeder {} is not registered", address))
}
