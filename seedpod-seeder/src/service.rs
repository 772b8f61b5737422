//! Seeder request handlers: range reads, uploads, replica pulls.

use std::net::Ipv4Addr;
use std::path::Path;

use async_trait::async_trait;

use seedpod_core::protocol::{Operation, SEEDER_OPERATIONS};
use seedpod_core::storage::{Storage, WriteOutcome};
use seedpod_core::transfer::{fetch_file, verify_file, NetworkSource};
use seedpod_core::{
    CallPolicy, Catalog, FileId, FileMetadata, OpError, Payload, Request, Response, SeederCall,
    Service,
};

use crate::tracker::TrackerLink;

pub struct SeederService {
    storage: Storage,
    tracker: TrackerLink,
    address: Ipv4Addr,
    /// Port other seeders listen on, for replica pulls.
    peer_port: u16,
    policy: CallPolicy,
}

impl SeederService {
    pub fn new(
        storage: Storage,
        tracker: TrackerLink,
        address: Ipv4Addr,
        peer_port: u16,
        policy: CallPolicy,
    ) -> Self {
        Self {
            storage,
            tracker,
            address,
            peer_port,
            policy,
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub async fn sign_out(&mut self) -> Result<(), OpError> {
        self.tracker.signout(self.address).await
    }

    async fn apply(&mut self, call: SeederCall) -> Result<Payload, OpError> {
        match call {
            SeederCall::Ping { message } => Ok(Payload::Text(format!("Received message: {}", message))),
            SeederCall::ReadRange {
                file_id,
                offset,
                count,
            } => {
                let data = self.storage.read_range(&file_id, offset, count).await?;
                let count = data.len() as u64;
                Ok(Payload::Chunk { data, count })
            }
            SeederCall::Store {
                file_id,
                file,
                data,
            } => self.store(file_id, file, data).await,
            SeederCall::Replicate {
                file_id,
                file_name,
                size,
                sources,
            } => self.replicate(file_id, file_name, size, &sources).await,
        }
    }

    /// Client upload: persist, then publish the new catalog. Undone if the
    /// tracker does not take it.
    async fn store(&mut self, file_id: FileId, file: FileMetadata, data: Vec<u8>) -> Result<Payload, OpError> {
        if self.storage.write(&file_id, file, &data).await? == WriteOutcome::AlreadyExists {
            return Ok(Payload::Text("already exists".into()));
        }
        if let Err(e) = self.tracker.update(self.address, self.storage.catalog()).await {
            tracing::warn!(file = %file_id, error = %e, "tracker update failed, rolling back upload");
            if let Err(re) = self.storage.remove(&file_id).await {
                tracing::error!(file = %file_id, error = %re, "rollback failed");
            }
            return Err(match e {
                OpError::Remote { .. } => OpError::validation(format!("tracker rejected update: {}", e)),
                other => other,
            });
        }
        Ok(Payload::Text(format!("file {} stored", file_id)))
    }

    /// Pull a file from `sources` into storage. The tracker records the new
    /// owner itself from the reply, so no update is sent from here. The reply
    /// lists the file under the name it is stored as locally.
    async fn replicate(
        &mut self,
        file_id: FileId,
        file_name: String,
        size: u64,
        sources: &[Ipv4Addr],
    ) -> Result<Payload, OpError> {
        if self.storage.contains(&file_id) {
            return self.held(file_id);
        }
        let dest = self.storage.destination_for(&file_name)?;
        let mut source = NetworkSource::new(self.peer_port, self.policy);
        let pulled = match fetch_file(&mut source, &file_id, size, sources, &dest).await {
            Ok(_) => verify_file(&dest, &file_id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = pulled {
            discard(&dest).await;
            return Err(e);
        }
        self.storage
            .adopt(file_id.clone(), FileMetadata::new(file_name, size), dest);
        tracing::info!(file = %file_id, sources = sources.len(), "replica pulled");
        self.held(file_id)
    }

    fn held(&self, file_id: FileId) -> Result<Payload, OpError> {
        let meta = self
            .storage
            .metadata(&file_id)
            .cloned()
            .ok_or_else(|| OpError::Internal(format!("file {} missing after store", file_id)))?;
        Ok(Payload::Listing(Catalog::from([(file_id, meta)])))
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "could not remove partial file");
        }
    }
}

#[async_trait]
impl Service for SeederService {
    fn operations(&self) -> &'static [Operation] {
        SEEDER_OPERATIONS
    }

    async fn handle(&mut self, request: Request) -> Response {
        let result = match SeederCall::parse(request) {
            Ok(call) => self.apply(call).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::debug!(error = %e, "request rejected");
        }
        Response::from_result(result)
    }
}
