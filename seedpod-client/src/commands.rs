//! Client operations: list, download, upload, ping.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use seedpod_core::transfer::{fetch_file, unique_destination, verify_file, NetworkSource};
use seedpod_core::{CallPolicy, Catalog, FileId, FileMetadata, OpError, PeerClient, Request};

use crate::config::Config;

pub struct Client {
    tracker: PeerClient,
    seeder_port: u16,
    policy: CallPolicy,
    download_dir: PathBuf,
}

/// Where an upload ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uploaded {
    pub file_id: FileId,
    pub seeder: Ipv4Addr,
    pub reply: String,
}

impl Client {
    pub fn new(cfg: &Config) -> Self {
        let policy = cfg.policy();
        Self {
            tracker: PeerClient::new(cfg.tracker, policy),
            seeder_port: cfg.seeder_port,
            policy,
            download_dir: cfg.download_dir.clone(),
        }
    }

    pub async fn ping(&mut self, message: &str) -> Result<String, OpError> {
        self.tracker.call_ok(&Request::ping(message)).await?.into_text()
    }

    /// Every file any seeder holds.
    pub async fn list(&mut self) -> Result<Catalog, OpError> {
        self.tracker.call_ok(&Request::list()).await?.into_listing()
    }

    /// Fetch a file from all of its owners into the download directory.
    /// A failed transfer leaves its partial file in place.
    pub async fn download(&mut self, file_hash: &str) -> Result<PathBuf, OpError> {
        let file_id = FileId::parse(file_hash)?;
        let owners = self
            .tracker
            .call_ok(&Request::locate(&file_id))
            .await?
            .into_owners()?;
        tracing::info!(
            file = %file_id,
            name = %owners.file_name,
            size = owners.size,
            owners = owners.owners.len(),
            "downloading"
        );

        tokio::fs::create_dir_all(&self.download_dir).await?;
        let dest = unique_destination(&self.download_dir, &owners.file_name)?;
        let mut source = NetworkSource::new(self.seeder_port, self.policy);
        let result = match fetch_file(&mut source, &file_id, owners.size, &owners.owners, &dest).await {
            Ok(_) => verify_file(&dest, &file_id).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(path = %dest.display(), "download incomplete, partial file left");
            return Err(e);
        }
        Ok(dest)
    }

    /// Ask the tracker for a seeder and send it the whole file.
    pub async fn upload(&mut self, path: &Path) -> Result<Uploaded, OpError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| OpError::validation(format!("{} has no file name", path.display())))?;
        let data = tokio::fs::read(path).await?;
        let size = data.len() as u64;
        let file_id = FileId::of_content(&data);

        let seeder = self
            .tracker
            .call_ok(&Request::reserve_upload(&file_id, size)?)
            .await?
            .into_address()?;
        tracing::info!(file = %file_id, %seeder, size, "uploading");

        let mut client = PeerClient::new(SocketAddr::from((seeder, self.seeder_port)), self.policy);
        let reply = client
            .call_ok(&Request::store(&file_id, FileMetadata::new(name, size), data))
            .await?
            .into_text()?;
        Ok(Uploaded {
            file_id,
            seeder,
            reply,
        })
    }
}
