//! Durable contact store.
//!
//! Reads are served from an in-memory [`ContactTable`] rebuilt from the
//! write-ahead log on open. A transaction mutates the table under its write
//! lock; at commit its journal is appended to the log as one frame, and a
//! failed append rolls the table back.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::contact::{Contact, ContactId};
use crate::storage::table::{CommitSink, ContactMutation, ContactTable, TableTransaction};
use crate::storage::traits::{ContactStore, ContactTransaction, StorageError};
use crate::time::Clock;

use super::codec::FrameError;
use super::file_lock::FileLock;
use super::wal::{WalEntry, WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

/// File name of the write-ahead log inside the database directory.
pub const WAL_FILE: &str = "contacts.wal";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

fn io_err(context: &str, err: &io::Error) -> StorageError {
    StorageError::Io(format!("{context}: {err}"))
}

fn frame_err(context: &str, err: FrameError) -> StorageError {
    match err {
        FrameError::Encode(reason) | FrameError::Corrupt(reason) => {
            StorageError::SerializationError(format!("{context}: {reason}"))
        }
        FrameError::Truncated => StorageError::Io(format!("{context}: truncated frame")),
        FrameError::Io(e) => io_err(context, &e),
    }
}

/// Outcome of a WAL compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactionResult {
    /// Records written into the snapshot.
    pub contacts: usize,
    /// Log size before compaction.
    pub wal_size_before: u64,
    /// Log size after compaction.
    pub wal_size_after: u64,
}

/// WAL-backed contact store.
pub struct PersistentContactStore {
    dir: PathBuf,
    _lock: FileLock,
    wal: WriteAheadLog,
    table: RwLock<ContactTable>,
    clock: Arc<dyn Clock>,
    config: PersistentConfig,
    /// Log size right after the last compaction, or at the last failed one.
    compacted_size: AtomicU64,
}

fn replay(entries: Vec<WalEntry>) -> Result<ContactTable, StorageError> {
    let mut table = ContactTable::default();
    let mut commits = 0usize;

    for entry in entries {
        match entry.kind {
            WalEntryKind::Snapshot { last_id, contacts } => {
                table = ContactTable::from_snapshot(contacts, last_id);
            }
            WalEntryKind::Commit { mutations } => {
                for mutation in &mutations {
                    table.apply(mutation).map_err(|e| {
                        StorageError::BackendError(format!(
                            "failed to replay WAL entry {}: {e}",
                            entry.sequence
                        ))
                    })?;
                }
                commits += 1;
            }
        }
    }

    if commits > 0 {
        info!(commits, "replayed WAL commits");
    }
    Ok(table)
}

impl PersistentContactStore {
    pub(crate) fn open(
        dir: &Path,
        config: PersistentConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)
            .map_err(|e| io_err("failed to create database directory", &e))?;

        let lock = FileLock::acquire(dir).map_err(|e| io_err("failed to acquire lock", &e))?;

        let (wal, entries) = WriteAheadLog::open(&dir.join(WAL_FILE), config.sync_on_write)
            .map_err(|e| io_err("failed to open WAL", &e))?;
        let table = replay(entries)?;

        info!(
            path = %dir.display(),
            contacts = table.live_count(),
            "opened contact database"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            _lock: lock,
            wal,
            table: RwLock::new(table),
            clock,
            config,
            compacted_size: AtomicU64::new(0),
        })
    }

    /// The database directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Rewrite the WAL as a single snapshot.
    ///
    /// Blocks until in-flight transactions finish.
    ///
    /// # Errors
    /// - `SerializationError` if the snapshot cannot be framed
    /// - `Io` if the snapshot cannot be written
    ///
    /// The old log stays intact on failure.
    pub fn compact(&self) -> Result<CompactionResult, StorageError> {
        let table = self.table.write().map_err(|_| lock_err("contact.compact"))?;
        self.compact_table(&table)
    }

    fn compact_table(&self, table: &ContactTable) -> Result<CompactionResult, StorageError> {
        let wal_size_before = self
            .wal
            .size_bytes()
            .map_err(|e| io_err("failed to stat WAL", &e))?;

        let contacts = table.snapshot();
        let count = contacts.len();
        self.wal
            .rewrite(WalEntryKind::Snapshot {
                last_id: table.last_id(),
                contacts,
            })
            .map_err(|e| frame_err("failed to write WAL snapshot", e))?;

        let wal_size_after = self
            .wal
            .size_bytes()
            .map_err(|e| io_err("failed to stat WAL", &e))?;
        self.compacted_size.store(wal_size_after, Ordering::Relaxed);

        info!(
            contacts = count,
            wal_size_before, wal_size_after, "compacted WAL"
        );
        Ok(CompactionResult {
            contacts: count,
            wal_size_before,
            wal_size_after,
        })
    }
}

impl CommitSink for PersistentContactStore {
    fn persist(
        &self,
        table: &ContactTable,
        mutations: &[ContactMutation],
    ) -> Result<(), StorageError> {
        self.wal
            .append(WalEntryKind::Commit {
                mutations: mutations.to_vec(),
            })
            .map_err(|e| frame_err("failed to append commit to WAL", e))?;

        // The commit is durable at this point; compaction trouble must not fail it.
        // A snapshot larger than the threshold must double before the next one.
        let threshold = self
            .config
            .max_wal_size
            .max(self.compacted_size.load(Ordering::Relaxed).saturating_mul(2));
        match self.wal.size_bytes() {
            Ok(size) if size > threshold => {
                if let Err(err) = self.compact_table(table) {
                    // Back off until the log doubles instead of retrying every commit.
                    self.compacted_size.store(size, Ordering::Relaxed);
                    warn!(%err, wal_size = size, "WAL compaction failed; log left uncompacted");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(%err, "failed to stat WAL after commit"),
        }
        Ok(())
    }
}

impl ContactStore for PersistentContactStore {
    fn begin(&self) -> Result<Box<dyn ContactTransaction + '_>, StorageError> {
        let guard = self.table.write().map_err(|_| lock_err("contact.begin"))?;
        Ok(Box::new(TableTransaction::new(
            guard,
            self.clock.as_ref(),
            self,
        )))
    }

    fn get(&self, id: ContactId) -> Result<Option<Contact>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("contact.get"))?;
        Ok(table.get_live(id).cloned())
    }

    fn list_all(&self) -> Result<Vec<Contact>, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("contact.list_all"))?;
        Ok(table.all())
    }

    fn count(&self) -> Result<usize, StorageError> {
        let table = self.table.read().map_err(|_| lock_err("contact.count"))?;
        Ok(table.live_count())
    }
}
