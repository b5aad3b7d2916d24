//! File-backed corpus storage.
//!
//! Committed records go to an append-only log:
//! 1. each entry is a little-endian `u32` length followed by a bincode body
//! 2. every append is fsync'd before the in-memory table changes
//! 3. on open, the log is replayed into memory; later revisions of a key
//!    replace earlier ones
//!
//! A failed append is cut back before the error is returned. A crash
//! mid-append can still leave a torn final entry; replay drops it and
//! truncates the log back to the last complete entry.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use mucorpus_model::{BackendError, Example, ExampleKey};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::{CasOutcome, CorpusBackend, RecordTable, Versioned};

// ============================================================================
// Commit Log
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LogEntry {
    Put { revision: u64, example: Example },
}

/// Append-only log of committed records.
pub struct CommitLog {
    file: Mutex<File>,
    path: PathBuf,
}

impl CommitLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and sync it to disk. Returns bytes written.
    pub fn append(&self, entry: &LogEntry) -> std::io::Result<u64> {
        self.append_with(entry, |file, frame| {
            file.write_all(frame)?;
            file.sync_data()
        })
    }

    /// Frame `entry` and hand it to `write`. If `write` fails, the file is
    /// cut back to its previous length so a partial frame never sits in
    /// front of later appends.
    pub(crate) fn append_with<W>(&self, entry: &LogEntry, write: W) -> std::io::Result<u64>
    where
        W: FnOnce(&mut File, &[u8]) -> std::io::Result<()>,
    {
        let data = bincode::serialize(entry)
            .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
        let len = u32::try_from(data.len())
            .map_err(|_| std::io::Error::new(ErrorKind::InvalidData, "log entry too large"))?;

        let mut file = self.file.lock();
        let prev_len = file.metadata()?.len();
        let mut frame = Vec::with_capacity(data.len() + 4);
        frame.extend_from_slice(&len.to_le_bytes());
        frame.extend_from_slice(&data);

        if let Err(err) = write(&mut *file, &frame) {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                restored_len = prev_len,
                "commit log append failed, rolling back"
            );
            if let Err(rollback) = file.set_len(prev_len).and_then(|()| file.sync_data()) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "commit log rollback failed"
                );
            }
            return Err(err);
        }

        Ok(frame.len() as u64)
    }

    /// Replay every complete entry in order. Returns the number replayed.
    pub fn replay<F: FnMut(LogEntry)>(&self, mut handler: F) -> std::io::Result<usize> {
        let mut file = self.file.lock();
        let file_len = file.metadata()?.len();
        file.seek(SeekFrom::Start(0))?;

        let mut good_offset = 0u64;
        let mut replayed = 0usize;

        loop {
            let mut len_bytes = [0u8; 4];
            match file.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }

            let len = u32::from_le_bytes(len_bytes) as usize;
            // A length running past the end of the file is a torn prefix.
            if len as u64 > file_len.saturating_sub(good_offset + 4) {
                break;
            }
            let mut data = vec![0u8; len];
            match file.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }

            let entry: LogEntry = bincode::deserialize(&data)
                .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
            handler(entry);
            replayed += 1;
            good_offset += 4 + len as u64;
        }

        if good_offset < file_len {
            tracing::warn!(
                path = %self.path.display(),
                kept_bytes = good_offset,
                dropped_bytes = file_len - good_offset,
                "truncating torn entry at end of commit log"
            );
            file.set_len(good_offset)?;
        }
        file.seek(SeekFrom::End(0))?;

        Ok(replayed)
    }
}

// ============================================================================
// File backend
// ============================================================================

/// Durable backend: in-memory table mirrored by a [`CommitLog`].
pub struct FileBackend {
    log: CommitLog,
    table: RecordTable,
}

impl FileBackend {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let log = CommitLog::open(path)?;
        let table = RecordTable::default();

        let replayed = log.replay(|entry| match entry {
            LogEntry::Put { revision, example } => table.restore(revision, example),
        })?;
        tracing::info!(
            path = %path.display(),
            entries = replayed,
            examples = table.len(),
            "opened corpus log"
        );

        Ok(Self { log, table })
    }

    pub fn path(&self) -> &Path {
        self.log.path()
    }
}

fn io_to_backend(err: std::io::Error) -> BackendError {
    match err.kind() {
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            BackendError::Unavailable(err.to_string())
        }
        _ => BackendError::Fault(err.to_string()),
    }
}

impl CorpusBackend for FileBackend {
    fn get(&self, key: &ExampleKey) -> Result<Option<Versioned>, BackendError> {
        Ok(self.table.get(key))
    }

    fn compare_and_set(
        &self,
        key: &ExampleKey,
        expected: Option<u64>,
        example: Example,
    ) -> Result<CasOutcome, BackendError> {
        self.table
            .compare_and_set(key, expected, example, |revision, example| {
                let entry = LogEntry::Put {
                    revision,
                    example: example.clone(),
                };
                self.log.append(&entry).map(|_| ()).map_err(io_to_backend)
            })
    }

    fn keys(&self) -> Result<Vec<ExampleKey>, BackendError> {
        Ok(self.table.sorted_keys())
    }

    fn generation(&self) -> u64 {
        self.table.generation()
    }
}
