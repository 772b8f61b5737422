//! File identity and metadata: content-derived FileId, catalog entries.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::OpError;

/// Number of hex characters of the content hash kept as the identifier.
pub const FILE_ID_LEN: usize = 5;

/// Largest file size accepted from a peer (1 TiB).
pub const MAX_FILE_SIZE: u64 = 1 << 40;

/// Display format of [`FileMetadata::last_modified`].
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Short content identifier: hash prefix of the file's bytes.
/// Distinct files sharing a prefix are not detected.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    /// Derive the identifier of `data`.
    pub fn of_content(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut id = hex::encode(digest);
        id.truncate(FILE_ID_LEN);
        FileId(id)
    }

    /// Parse an identifier received from a peer. Must be exactly
    /// `FILE_ID_LEN` lowercase hex digits.
    pub fn parse(s: &str) -> Result<Self, OpError> {
        if Self::is_well_formed(s) {
            Ok(FileId(s.to_string()))
        } else {
            Err(OpError::validation(format!("invalid file hash '{}'", s)))
        }
    }

    fn is_well_formed(s: &str) -> bool {
        s.len() == FILE_ID_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if this id was decoded off the wire in a valid shape.
    pub fn is_valid(&self) -> bool {
        Self::is_well_formed(&self.0)
    }

    /// Check that `data` hashes to this identifier.
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::of_content(data) == *self
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Name, size and modification stamp of one stored file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub name: String,
    pub size: u64,
    pub last_modified: String,
}

impl FileMetadata {
    /// New metadata stamped with the current local time.
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            last_modified: now_stamp(),
        }
    }

    /// Refresh `last_modified` after a write.
    pub fn touch(&mut self) {
        self.last_modified = now_stamp();
    }
}

fn now_stamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// FileId -> metadata for every file one node holds.
pub type Catalog = BTreeMap<FileId, FileMetadata>;

/// Reject a size no real file can have.
pub fn check_size(size: u64) -> Result<u64, OpError> {
    if size > MAX_FILE_SIZE {
        return Err(OpError::validation(format!(
            "size {} exceeds the {} byte limit",
            size, MAX_FILE_SIZE
        )));
    }
    Ok(size)
}

/// Check one catalog entry: well-formed id, non-empty name, plausible size.
pub fn validate_entry(id: &FileId, meta: &FileMetadata) -> Result<(), OpError> {
    if !id.is_valid() {
        return Err(OpError::validation(format!("invalid file hash '{}'", id)));
    }
    if meta.name.is_empty() {
        return Err(OpError::validation(format!("file {} has an empty name", id)));
    }
    check_size(meta.size)
        .map(|_| ())
        .map_err(|e| OpError::validation(format!("file {}: {}", id, e)))
}

/// Check every entry of a catalog a node is announcing.
pub fn validate_catalog(catalog: &Catalog) -> Result<(), OpError> {
    catalog.iter().try_for_each(|(id, meta)| validate_entry(id, meta))
}

/// Total bytes held by a catalog. Used as the load measure for placement.
pub fn catalog_load(catalog: &Catalog) -> u64 {
    catalog
        .values()
        .fold(0u64, |total, m| total.saturating_add(m.size))
}
