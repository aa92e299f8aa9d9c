//! Write-Ahead Log (WAL) for durability.
//!
//! Every mutation is appended here before it touches the memtable. An
//! entry is framed as `[u32 LE length][u32 LE CRC32][JSON payload]`; the
//! CRC covers the payload. Recovery replays entries in order and treats a
//! short or corrupt frame as the end of the log, discarding the torn tail.

use crate::record::StorageRecord;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WAL serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Fsync policy for the WAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// Fsync after every write.
    Always,
    /// Fsync periodically (caller controls).
    Batch,
    /// Never explicitly fsync (OS decides).
    None,
}

impl FsyncPolicy {
    pub fn from_str_config(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "always" => Self::Always,
            "none" => Self::None,
            _ => Self::Batch,
        }
    }
}

/// An append-only write-ahead log.
#[derive(Debug)]
pub struct Wal {
    writer: BufWriter<File>,
    fsync: FsyncPolicy,
    entries_written: u64,
}

impl Wal {
    /// Open or create a WAL file at the given path.
    pub fn open(path: &Path, fsync: FsyncPolicy) -> Result<Self, WalError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            fsync,
            entries_written: 0,
        })
    }

    /// Append a record.
    pub fn append(&mut self, record: &StorageRecord) -> Result<(), WalError> {
        let payload = serde_json::to_vec(record)?;
        let crc = crc32fast::hash(&payload);

        self.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&crc.to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.flush()?;

        if self.fsync == FsyncPolicy::Always {
            self.writer.get_ref().sync_all()?;
        }

        self.entries_written += 1;
        Ok(())
    }

    /// Explicitly fsync (for batch mode).
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Number of entries appended since open.
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    /// Replay all intact entries from a WAL file, in append order.
    ///
    /// A missing file is an empty log. A torn or corrupt frame ends the
    /// replay; everything before it is returned.
    pub fn replay(path: &Path) -> Result<Vec<StorageRecord>, WalError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(WalError::Io(e)),
        };

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        while let Some(record) = read_frame(&mut reader, records.len())? {
            records.push(record);
        }
        Ok(records)
    }
}

/// Read one frame. Returns `None` on clean EOF, on a torn frame, or on a
/// CRC mismatch (the log ends there).
fn read_frame(
    reader: &mut impl Read,
    entry_num: usize,
) -> Result<Option<StorageRecord>, WalError> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(WalError::Io(e)),
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut crc_buf = [0u8; 4];
    let mut payload = vec![0u8; len];
    let torn = read_fully(reader, &mut crc_buf)? || read_fully(reader, &mut payload)?;
    if torn {
        tracing::warn!("WAL torn mid-frame at entry {}; discarding tail", entry_num);
        return Ok(None);
    }

    let expected = u32::from_le_bytes(crc_buf);
    let actual = crc32fast::hash(&payload);
    if expected != actual {
        tracing::warn!(
            "WAL CRC mismatch at entry {} (expected {:#010x}, got {:#010x}); discarding tail",
            entry_num,
            expected,
            actual
        );
        return Ok(None);
    }

    Ok(Some(serde_json::from_slice(&payload)?))
}

/// Fill `buf`, reporting `true` if the reader ran out mid-read.
fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool, WalError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(true),
        Err(e) => Err(WalError::Io(e)),
    }
}
