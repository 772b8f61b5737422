//! Seeder storage: local catalog plus range reads and whole-file writes on disk.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::OpError;
use crate::file::{Catalog, FileId, FileMetadata, TIMESTAMP_FORMAT};
use crate::transfer::{unique_destination, MAX_RANGE_READ};

/// Bytes a range read of `count` at `offset` actually returns from a file of
/// `file_size` bytes. Reads past the end are clamped; starting past the end
/// is an error.
pub fn clamp_range(file_size: u64, offset: u64, count: u64) -> Result<u64, OpError> {
    if offset > file_size {
        return Err(OpError::validation(format!(
            "offset {} beyond file size {}",
            offset, file_size
        )));
    }
    Ok(count.min(file_size - offset))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Stored,
    AlreadyExists,
}

#[derive(Debug, Clone)]
struct StoredFile {
    path: PathBuf,
    meta: FileMetadata,
}

/// Files held by one seeder. Only the owning seeder touches this directory.
pub struct Storage {
    root: PathBuf,
    files: BTreeMap<FileId, StoredFile>,
}

impl Storage {
    /// Open `root`, creating it if missing, and index every regular file in it.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, OpError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        let mut storage = Self {
            root,
            files: BTreeMap::new(),
        };
        storage.scan().await?;
        Ok(storage)
    }

    async fn scan(&mut self) -> Result<(), OpError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let fs_meta = entry.metadata().await?;
            if !fs_meta.is_file() {
                continue;
            }
            let path = entry.path();
            let data = tokio::fs::read(&path).await?;
            let id = FileId::of_content(&data);
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(existing) = self.files.get(&id) {
                tracing::warn!(
                    file = %id,
                    kept = %existing.path.display(),
                    skipped = %path.display(),
                    "duplicate content in storage"
                );
                continue;
            }
            let last_modified = fs_meta
                .modified()
                .map(|t| {
                    chrono::DateTime::<chrono::Local>::from(t)
                        .format(TIMESTAMP_FORMAT)
                        .to_string()
                })
                .unwrap_or_default();
            let meta = FileMetadata {
                name,
                size: data.len() as u64,
                last_modified,
            };
            self.files.insert(id, StoredFile { path, meta });
        }
        tracing::info!(root = %self.root.display(), files = self.files.len(), "storage indexed");
        Ok(())
    }

    pub fn catalog(&self) -> Catalog {
        self.files
            .iter()
            .map(|(id, f)| (id.clone(), f.meta.clone()))
            .collect()
    }

    pub fn contains(&self, id: &FileId) -> bool {
        self.files.contains_key(id)
    }

    pub fn metadata(&self, id: &FileId) -> Option<&FileMetadata> {
        self.files.get(id).map(|f| &f.meta)
    }

    /// Read up to `count` bytes at `offset`. Returns fewer bytes when the
    /// range runs past the end, and none at exactly the end. More than
    /// [`MAX_RANGE_READ`] bytes at once is refused.
    pub async fn read_range(&self, id: &FileId, offset: u64, count: u64) -> Result<Vec<u8>, OpError> {
        let stored = self
            .files
            .get(id)
            .ok_or_else(|| OpError::not_found(format!("file {} not found", id)))?;
        let count = clamp_range(stored.meta.size, offset, count)?;
        if count > MAX_RANGE_READ {
            return Err(OpError::validation(format!(
                "range of {} bytes exceeds the {} byte read limit",
                count, MAX_RANGE_READ
            )));
        }
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut file = tokio::fs::File::open(&stored.path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; count as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Persist a whole file. A FileId already held is left untouched.
    pub async fn write(
        &mut self,
        id: &FileId,
        meta: FileMetadata,
        data: &[u8],
    ) -> Result<WriteOutcome, OpError> {
        if self.contains(id) {
            return Ok(WriteOutcome::AlreadyExists);
        }
        if data.len() as u64 != meta.size {
            return Err(OpError::validation(format!(
                "file size mismatch: declared {}, received {}",
                meta.size,
                data.len()
            )));
        }
        if !id.matches(data) {
            return Err(OpError::validation(format!("content does not hash to {}", id)));
        }
        let path = self.destination_for(&meta.name)?;
        tokio::fs::write(&path, data).await?;
        self.adopt(id.clone(), meta, path);
        Ok(WriteOutcome::Stored)
    }

    /// Free path in the storage directory for a file called `name`.
    pub fn destination_for(&self, name: &str) -> Result<PathBuf, OpError> {
        unique_destination(&self.root, name)
    }

    /// Add a file already written at `path` to the catalog.
    pub fn adopt(&mut self, id: FileId, mut meta: FileMetadata, path: PathBuf) {
        if let Some(stored_name) = path.file_name() {
            meta.name = stored_name.to_string_lossy().into_owned();
        }
        meta.touch();
        tracing::info!(file = %id, name = %meta.name, size = meta.size, "file stored");
        self.files.insert(id, StoredFile { path, meta });
    }

    /// Delete a file from disk and the catalog.
    pub async fn remove(&mut self, id: &FileId) -> Result<(), OpError> {
        let stored = self
            .files
            .remove(id)
            .ok_or_else(|| OpError::not_found(format!("file {} not found", id)))?;
        tokio::fs::remove_file(&stored.path).await?;
        Ok(())
    }
}
