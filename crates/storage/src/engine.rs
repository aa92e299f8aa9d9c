//! Storage engine: combines WAL + Memtable.
//!
//! All writes go through the WAL first (for durability), then into
//! the in-memory memtable (for fast reads). The engine assigns the
//! write timestamp, so `ts_ms` always means "last write observed by
//! this replica".

use crate::memtable::Memtable;
use crate::record::{now_ms, StorageRecord};
use crate::wal::{FsyncPolicy, Wal, WalError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The storage engine. All operations are synchronous (blocking I/O).
/// The async boundary is at the caller (cluster layer).
#[derive(Debug)]
pub struct Engine {
    memtable: Memtable,
    wal: Wal,
    #[allow(dead_code)] // will be used for WAL rotation/compaction
    wal_path: PathBuf,
}

impl Engine {
    /// Open or create a storage engine at the given directory.
    pub fn open(data_dir: &Path, fsync: FsyncPolicy) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let wal_path = data_dir.join("wal.log");

        // Replay WAL to rebuild the memtable
        let records = Wal::replay(&wal_path)?;
        let mut memtable = Memtable::new();
        for record in records {
            memtable.load_from_wal(record);
        }

        let wal = Wal::open(&wal_path, fsync)?;

        tracing::info!(
            "storage engine opened: {} keys recovered from WAL at {:?}",
            memtable.len(),
            wal_path
        );

        Ok(Self {
            memtable,
            wal,
            wal_path,
        })
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<(Vec<u8>, u64)> {
        self.memtable
            .get(key)
            .map(|e| (e.value.clone(), e.ts_ms))
    }

    /// Write a value. Assigns and returns the write timestamp.
    pub fn put(&mut self, key: &str, value: Vec<u8>) -> Result<u64, StorageError> {
        let ts_ms = now_ms();
        let record = StorageRecord::entry(key.to_string(), value, ts_ms);
        self.wal.append(&record)?;
        self.memtable.insert(record.key, record.value, record.ts_ms);
        Ok(ts_ms)
    }

    /// Remove a key outright.
    ///
    /// A removal record goes to the WAL so replay observes the delete; the
    /// live map keeps no tombstone, so a deleted key is indistinguishable
    /// from one never written.
    pub fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        let record = StorageRecord::removal(key.to_string(), now_ms());
        self.wal.append(&record)?;
        self.memtable.remove(key);
        Ok(())
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        self.memtable.len()
    }

    /// All live keys.
    pub fn all_keys(&self) -> Vec<String> {
        self.memtable.keys()
    }

    /// `key -> ts_ms` for every live key.
    pub fn all_meta(&self) -> HashMap<String, u64> {
        self.memtable.meta()
    }

    /// Sync the WAL to disk (for batch fsync mode).
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.wal.sync()?;
        Ok(())
    }
}
