//! Content-addressed evidence storage with BLAKE3 hashing
//!
//! Keeps the raw failure log a signature was learned from, so operators
//! can audit what the stored remediation actually saw. Identical logs
//! deduplicate to one blob.

use crate::error::{Result, CisageError};
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;

/// Content-addressed evidence blob store
pub struct EvidenceStore {
    base_path: PathBuf,
    compression_threshold: usize,
}

impl EvidenceStore {
    /// Create a new evidence store at the given base path
    pub fn new(base_path: PathBuf, compression_threshold: usize) -> Result<Self> {
        let evidence_dir = base_path.join("evidence");
        fs::create_dir_all(&evidence_dir).map_err(|e| CisageError::Io {
            source: e,
            context: format!(
                "Failed to create evidence directory: {}",
                evidence_dir.display()
            ),
        })?;

        Ok(Self {
            base_path,
            compression_threshold,
        })
    }

    /// Write data to evidence storage, returning the content hash
    /// Returns (hash, was_compressed, was_new)
    pub fn write(&self, data: &[u8]) -> Result<(String, bool, bool)> {
        let hash = hash_data(data);

        let blob_path = self.blob_path(&hash);
        if blob_path.exists() {
            return Ok((hash, false, false));
        }

        let should_compress = data.len() >= self.compression_threshold;

        // Write to a temporary file first, then rename (atomic publish)
        let temp_path = self.temp_path(&hash);
        let parent = temp_path
            .parent()
            .ok_or_else(|| CisageError::Store("Invalid evidence path".to_string()))?;
        fs::create_dir_all(parent).map_err(|e| CisageError::Io {
            source: e,
            context: format!("Failed to create parent directory: {}", parent.display()),
        })?;

        let mut file = fs::File::create(&temp_path).map_err(|e| CisageError::Io {
            source: e,
            context: format!("Failed to create temp evidence file: {}", temp_path.display()),
        })?;

        if should_compress {
            let compressed = zstd::encode_all(data, 3).map_err(|e| CisageError::Io {
                source: e,
                context: "Failed to compress evidence data".to_string(),
            })?;
            file.write_all(&compressed).map_err(|e| CisageError::Io {
                source: e,
                context: format!(
                    "Failed to write compressed evidence: {}",
                    temp_path.display()
                ),
            })?;
        } else {
            file.write_all(data).map_err(|e| CisageError::Io {
                source: e,
                context: format!("Failed to write evidence data: {}", temp_path.display()),
            })?;
        }

        file.sync_all().map_err(|e| CisageError::Io {
            source: e,
            context: format!("Failed to sync evidence file: {}", temp_path.display()),
        })?;
        drop(file);

        fs::rename(&temp_path, &blob_path).map_err(|e| CisageError::Io {
            source: e,
            context: format!(
                "Failed to rename temp evidence to final location: {} -> {}",
                temp_path.display(),
                blob_path.display()
            ),
        })?;

        Ok((hash, should_compress, true))
    }

    /// Read data from evidence storage
    pub fn read(&self, hash: &str) -> Result<Vec<u8>> {
        let blob_path = self.blob_path(hash);

        if !blob_path.exists() {
            return Err(CisageError::Store(format!("Evidence not found: {}", hash)));
        }

        let mut file = fs::File::open(&blob_path).map_err(|e| CisageError::Io {
            source: e,
            context: format!("Failed to open evidence file: {}", blob_path.display()),
        })?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(|e| CisageError::Io {
            source: e,
            context: format!("Failed to read evidence data: {}", blob_path.display()),
        })?;

        // Try to decompress (if it fails, assume it wasn't compressed)
        match zstd::decode_all(&data[..]) {
            Ok(decompressed) => Ok(decompressed),
            Err(_) => Ok(data),
        }
    }

    /// Check if an evidence blob exists
    pub fn exists(&self, hash: &str) -> bool {
        self.blob_path(hash).exists()
    }

    /// Get the path for a blob given its hash
    /// Uses two-level sharding: evidence/ab/cd/abcdef123456...
    fn blob_path(&self, hash: &str) -> PathBuf {
        let shard1 = &hash[0..2];
        let shard2 = &hash[2..4];
        self.base_path
            .join("evidence")
            .join(shard1)
            .join(shard2)
            .join(hash)
    }

    /// Get temporary path for atomic writes
    fn temp_path(&self, hash: &str) -> PathBuf {
        let shard1 = &hash[0..2];
        let shard2 = &hash[2..4];
        self.base_path
            .join("evidence")
            .join(shard1)
            .join(shard2)
            .join(format!("{}.tmp", hash))
    }
}

/// Hash data using BLAKE3, 32 hex chars
fn hash_data(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("{:.32}", hash.to_hex())
}
