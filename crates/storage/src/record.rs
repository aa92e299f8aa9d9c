//! WAL record format.

use serde::{Deserialize, Serialize};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// One logged mutation: either a versioned entry or a removal.
///
/// Removal records exist only in the WAL so replay observes deletes; the
/// memtable drops the key entirely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageRecord {
    /// The key (opaque string).
    pub key: String,
    /// Value bytes (empty for removals).
    pub value: Vec<u8>,
    /// Wall-clock timestamp (millis since epoch) assigned by this store.
    pub ts_ms: u64,
    /// Whether this record removes the key.
    pub removal: bool,
}

impl StorageRecord {
    /// A live entry.
    pub fn entry(key: String, value: Vec<u8>, ts_ms: u64) -> Self {
        Self {
            key,
            value,
            ts_ms,
            removal: false,
        }
    }

    /// A removal marker.
    pub fn removal(key: String, ts_ms: u64) -> Self {
        Self {
            key,
            value: Vec::new(),
            ts_ms,
            removal: true,
        }
    }
}
