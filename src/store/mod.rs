//! Sharded, content-addressed file store with integrity verification.
//!
//! ```text
//! <root>/content/<shard>/<id>.txt   raw UTF-8 content
//! <root>/metadata/<id>.json         {id, size, checksum, stored_at}
//! <shard> = first two characters of id
//! ```

mod size;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

pub use size::parse_size;

const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("content for '{0}' exceeds the configured size limit")]
    TooLarge(String),

    #[error("checksum mismatch for '{0}': stored content does not match its recorded checksum")]
    IntegrityFailure(String),

    #[error("invalid size string: {0}")]
    InvalidSize(String),

    #[error("i/o error on '{0}': {1}")]
    Io(String, std::io::Error),

    #[error("metadata corrupt for '{0}': {1}")]
    Serde(String, serde_json::Error),
}

/// Metadata sidecar persisted next to each blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileStoreRecord {
    pub id: String,
    pub size: u64,
    pub checksum: String,
    pub stored_at: DateTime<Utc>,
}

/// Aggregate counts returned by [`FileStore::get_stats`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub count: u64,
    pub total_size: u64,
}

#[derive(Debug, Clone)]
pub struct FileStoreConfig {
    pub root: PathBuf,
    pub max_size: u64,
}

impl FileStoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

/// Sharded content-addressed blob store. `id` is always caller-chosen;
/// the store only ever derives the shard prefix and the checksum from it.
pub struct FileStore {
    config: FileStoreConfig,
}

impl FileStore {
    pub fn new(config: FileStoreConfig) -> Self {
        Self { config }
    }

    fn shard_dir(&self, id: &str) -> PathBuf {
        let shard: String = id.chars().take(2).collect();
        self.config.root.join("content").join(shard)
    }

    fn content_path(&self, id: &str) -> PathBuf {
        self.shard_dir(id).join(format!("{id}.txt"))
    }

    fn metadata_dir(&self) -> PathBuf {
        self.config.root.join("metadata")
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.metadata_dir().join(format!("{id}.json"))
    }

    /// Compute, store, and return the SHA-256 checksum of `content`.
    /// Writes the content file before the metadata sidecar, so a crash
    /// between the two writes leaves an orphan blob rather than a
    /// dangling metadata pointer.
    pub async fn store(&self, id: &str, content: &str) -> Result<String, StoreError> {
        let bytes = content.as_bytes();
        if bytes.len() as u64 > self.config.max_size {
            return Err(StoreError::TooLarge(id.to_string()));
        }

        let shard_dir = self.shard_dir(id);
        tokio::fs::create_dir_all(&shard_dir)
            .await
            .map_err(|e| io_err(&shard_dir, e))?;

        let checksum = checksum_of(bytes);

        let content_path = self.content_path(id);
        tokio::fs::write(&content_path, bytes)
            .await
            .map_err(|e| io_err(&content_path, e))?;

        let record = FileStoreRecord {
            id: id.to_string(),
            size: bytes.len() as u64,
            checksum: checksum.clone(),
            stored_at: Utc::now(),
        };

        let metadata_dir = self.metadata_dir();
        tokio::fs::create_dir_all(&metadata_dir)
            .await
            .map_err(|e| io_err(&metadata_dir, e))?;

        let metadata_path = self.metadata_path(id);
        let pretty = serde_json::to_vec_pretty(&record)
            .map_err(|e| StoreError::Serde(id.to_string(), e))?;
        tokio::fs::write(&metadata_path, pretty)
            .await
            .map_err(|e| io_err(&metadata_path, e))?;

        debug!(id, checksum = %checksum, "stored content-addressed blob");
        Ok(checksum)
    }

    /// Read `id`'s content, verifying its checksum against the metadata
    /// sidecar when present. A missing sidecar is treated as an
    /// acceptable legacy record, not an error.
    pub async fn retrieve(&self, id: &str) -> Result<Option<String>, StoreError> {
        let content_path = self.content_path(id);
        let bytes = match tokio::fs::read(&content_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&content_path, e)),
        };

        let metadata_path = self.metadata_path(id);
        match tokio::fs::read(&metadata_path).await {
            Ok(raw) => {
                let record: FileStoreRecord =
                    serde_json::from_slice(&raw).map_err(|e| StoreError::Serde(id.to_string(), e))?;
                let actual = checksum_of(&bytes);
                if actual != record.checksum {
                    warn!(id, expected = %record.checksum, actual = %actual, "content checksum mismatch");
                    return Err(StoreError::IntegrityFailure(id.to_string()));
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(id, "no metadata sidecar, treating as legacy record");
            }
            Err(e) => return Err(io_err(&metadata_path, e)),
        }

        Ok(Some(String::from_utf8_lossy(&bytes).to_string()))
    }

    /// Remove both files for `id`. Returns whether the content file was
    /// present before deletion; missing-file errors are swallowed, other
    /// I/O errors propagate.
    pub async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let content_path = self.content_path(id);
        let existed = match tokio::fs::remove_file(&content_path).await {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(io_err(&content_path, e)),
        };

        let metadata_path = self.metadata_path(id);
        match tokio::fs::remove_file(&metadata_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(&metadata_path, e)),
        }

        Ok(existed)
    }

    /// Filesystem existence check on the content path only.
    pub async fn exists(&self, id: &str) -> bool {
        tokio::fs::try_exists(self.content_path(id))
            .await
            .unwrap_or(false)
    }

    /// Walk `content/*/*.txt`, counting files and summing their sizes.
    pub async fn get_stats(&self) -> Result<StoreStats, StoreError> {
        let content_root = self.config.root.join("content");
        let mut stats = StoreStats::default();

        let mut shard_entries = match tokio::fs::read_dir(&content_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(io_err(&content_root, e)),
        };

        let mut shard_dirs = Vec::new();
        while let Some(entry) = shard_entries
            .next_entry()
            .await
            .map_err(|e| io_err(&content_root, e))?
        {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                shard_dirs.push(entry.path());
            }
        }

        for shard_dir in shard_dirs {
            let mut files = tokio::fs::read_dir(&shard_dir)
                .await
                .map_err(|e| io_err(&shard_dir, e))?;
            while let Some(entry) = files.next_entry().await.map_err(|e| io_err(&shard_dir, e))? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                    continue;
                }
                let meta = entry.metadata().await.map_err(|e| io_err(&path, e))?;
                stats.count += 1;
                stats.total_size += meta.len();
            }
        }

        Ok(stats)
    }
}

fn checksum_of(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io(path.display().to_string(), source)
}
