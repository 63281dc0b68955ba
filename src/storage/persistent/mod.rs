//! Persistent storage backend for Linkage.
//!
//! Durable, crash-safe contact storage with:
//! - A write-ahead log holding one checksummed frame per committed transaction
//! - File locking for single-process access
//! - Snapshot compaction once the log grows past a threshold
//!
//! Reads are served from an in-memory table rebuilt from the log at open.
//!
//! # Layout
//!
//! ```text
//! <dir>/
//!   LOCK           exclusive advisory lock (holder pid)
//!   contacts.wal   [header][snapshot?][commit][commit]...
//! ```

mod codec;
mod file_lock;
mod stores;
mod wal;

pub use codec::FrameError;
pub use file_lock::FileLock;
pub use stores::{CompactionResult, PersistentContactStore, WAL_FILE};
pub use wal::{WalEntry, WalEntryKind, WriteAheadLog};

use std::path::Path;
use std::sync::Arc;

use crate::storage::traits::StorageError;
use crate::time::{Clock, SystemClock};

/// Configuration for persistent storage.
#[derive(Debug, Clone)]
pub struct PersistentConfig {
    /// WAL size that triggers compaction after a commit (bytes).
    pub max_wal_size: u64,
    /// Whether to fsync after every commit (slower but safer).
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 16 * 1024 * 1024, // 16 MB
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    /// Smallest accepted `max_wal_size`.
    pub const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Check the configuration.
    ///
    /// # Errors
    /// - `InvalidConfig` if `max_wal_size` is below 4 KiB
    pub fn validate(self) -> Result<Self, StorageError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(StorageError::InvalidConfig(format!(
                "max_wal_size must be at least {} bytes (got {})",
                Self::MIN_WAL_SIZE,
                self.max_wal_size
            )));
        }
        Ok(self)
    }
}

/// Open or create a persistent contact database at `path`.
///
/// # Errors
/// - If the directory cannot be created or accessed
/// - If another process holds the lock
/// - If the log header is invalid or replay finds inconsistent commits
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use linkage::storage::open_database;
/// use linkage::IdentityResolver;
///
/// let store = open_database("./contacts.db", None)?;
/// let resolver = IdentityResolver::new(Arc::new(store));
/// ```
pub fn open_database(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> Result<PersistentContactStore, StorageError> {
    open_database_with_clock(path, config, Arc::new(SystemClock))
}

/// [`open_database`] with an explicit timestamp source.
///
/// # Errors
/// Same as [`open_database`].
pub fn open_database_with_clock(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
    clock: Arc<dyn Clock>,
) -> Result<PersistentContactStore, StorageError> {
    let cfg = config.unwrap_or_default().validate()?;
    PersistentContactStore::open(path.as_ref(), cfg, clock)
}
