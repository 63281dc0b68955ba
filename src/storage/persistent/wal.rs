//! Write-ahead log of committed contact transactions.
//!
//! Every committed transaction is one frame, so a commit is either fully on
//! disk or (after a crash mid-write) a torn tail that recovery cuts off.
//! Compaction replaces the whole log with a single snapshot frame via
//! write-to-temp and rename.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [FRAME 1: codec-encoded WalEntry]
//! [FRAME 2: codec-encoded WalEntry]
//! ...
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::contact::Contact;
use crate::storage::table::ContactMutation;

use super::codec::{self, FrameError, HEADER_LEN};

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The logged payload.
    pub kind: WalEntryKind,
}

/// The payload of a WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntryKind {
    /// All mutations of one committed transaction, in order.
    Commit {
        /// Mutations to replay.
        mutations: Vec<ContactMutation>,
    },
    /// Full table image written by compaction.
    Snapshot {
        /// Highest id ever allocated.
        last_id: u64,
        /// Every record, soft-deleted ones included.
        contacts: Vec<Contact>,
    },
}

struct WalWriter {
    file: File,
    len: u64,
    sequence: u64,
}

/// Write-ahead log file. Thread-safe via an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

fn poisoned() -> io::Error {
    io::Error::new(ErrorKind::Other, "poisoned lock: wal.writer")
}

/// Result of scanning a log file from the start.
struct Scan {
    entries: Vec<WalEntry>,
    /// Offset just past the last intact frame.
    valid_len: u64,
    file_len: u64,
}

fn scan(path: &Path) -> io::Result<Scan> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader)?;

    let mut entries = Vec::new();
    let mut valid_len = HEADER_LEN;
    while valid_len < file_len {
        match codec::decode_frame::<WalEntry>(&mut reader) {
            Ok((entry, consumed)) => {
                valid_len += consumed;
                entries.push(entry);
            }
            Err(FrameError::Truncated) => {
                warn!(offset = valid_len, "WAL ends in a torn frame");
                break;
            }
            Err(FrameError::Corrupt(reason)) => {
                warn!(offset = valid_len, %reason, "WAL frame is corrupt; ignoring the rest of the log");
                break;
            }
            Err(FrameError::Io(e)) => return Err(e),
            Err(FrameError::Encode(_)) => unreachable!("decode_frame never returns FrameError::Encode"),
        }
    }

    Ok(Scan {
        entries,
        valid_len,
        file_len,
    })
}

impl WriteAheadLog {
    /// Open or create a WAL file, returning the log and its intact entries.
    ///
    /// A torn or corrupt tail is cut off so new commits are never appended
    /// behind unreadable bytes.
    pub fn open(path: &Path, sync_on_write: bool) -> io::Result<(Self, Vec<WalEntry>)> {
        let needs_header = fs::metadata(path).map_or(true, |m| m.len() < HEADER_LEN);
        if needs_header {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            file.sync_all()?;
        }

        let scan = scan(path)?;
        if scan.valid_len < scan.file_len {
            warn!(
                dropped_bytes = scan.file_len - scan.valid_len,
                "truncating WAL to last intact commit"
            );
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(scan.valid_len)?;
            file.sync_all()?;
        }

        let sequence = scan.entries.last().map_or(0, |e| e.sequence);
        let file = OpenOptions::new().append(true).open(path)?;
        let wal = Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                file,
                len: scan.valid_len,
                sequence,
            }),
            sync_on_write,
        };
        Ok((wal, scan.entries))
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, WalWriter>> {
        self.writer.lock().map_err(|_| poisoned())
    }

    /// Append an entry. Returns its sequence number.
    ///
    /// # Errors
    /// - `FrameError::Encode` if the entry cannot be framed; nothing is written
    /// - `FrameError::Io` if the write or sync fails
    ///
    /// On failure the file is cut back to its previous length so a partial
    /// frame never precedes later commits.
    pub fn append(&self, kind: WalEntryKind) -> Result<u64, FrameError> {
        let mut writer = self.lock()?;
        let sequence = writer.sequence + 1;
        let frame = codec::encode_frame(&WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        })?;

        let written = writer.file.write_all(&frame).and_then(|()| {
            if self.sync_on_write {
                writer.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(err) = written {
            if let Err(cut) = writer.file.set_len(writer.len) {
                warn!(error = %cut, "failed to cut back partial WAL frame");
            }
            return Err(err.into());
        }

        writer.len += frame.len() as u64;
        writer.sequence = sequence;
        Ok(sequence)
    }

    /// Replace the whole log with a single entry.
    ///
    /// The new log is written beside the old one and renamed over it, so a
    /// crash leaves either the old or the new log intact.
    pub fn rewrite(&self, kind: WalEntryKind) -> Result<(), FrameError> {
        let mut writer = self.lock()?;

        let frame = codec::encode_frame(&WalEntry {
            sequence: 1,
            timestamp: Utc::now(),
            kind,
        })?;
        let tmp_path = self.path.with_extension("wal.compact");
        {
            let mut tmp = File::create(&tmp_path)?;
            codec::write_header(&mut tmp)?;
            tmp.write_all(&frame)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        writer.file = OpenOptions::new().append(true).open(&self.path)?;
        writer.len = HEADER_LEN + frame.len() as u64;
        writer.sequence = 1;
        Ok(())
    }

    /// Sequence number of the last entry.
    pub fn current_sequence(&self) -> io::Result<u64> {
        Ok(self.lock()?.sequence)
    }

    /// WAL file size in bytes.
    pub fn size_bytes(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::{ContactId, LinkPrecedence};
    use tempfile::tempdir;

    fn contact(id: u64) -> Contact {
        let now = Utc::now();
        Contact {
            id: ContactId::new(id),
            email: Some(format!("c{id}@example.com")),
            phone_number: None,
            link_precedence: LinkPrecedence::Primary,
            linked_id: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn commit(id: u64) -> WalEntryKind {
        WalEntryKind::Commit {
            mutations: vec![ContactMutation::Insert(contact(id))],
        }
    }

    #[test]
    fn test_append_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.wal");

        {
            let (wal, entries) = WriteAheadLog::open(&path, false).unwrap();
            assert!(entries.is_empty());
            assert_eq!(wal.append(commit(1)).unwrap(), 1);
            assert_eq!(wal.append(commit(2)).unwrap(), 2);
        }

        let (wal, entries) = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].sequence, 1);
        assert!(matches!(entries[1].kind, WalEntryKind::Commit { .. }));
        assert_eq!(wal.current_sequence().unwrap(), 2);
    }

    #[test]
    fn test_torn_tail_is_cut_off() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("torn.wal");

        {
            let (wal, _) = WriteAheadLog::open(&path, true).unwrap();
            wal.append(commit(1)).unwrap();
            wal.append(commit(2)).unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 3).unwrap();
        drop(file);

        {
            let (wal, entries) = WriteAheadLog::open(&path, true).unwrap();
            assert_eq!(entries.len(), 1);
            assert_eq!(wal.append(commit(3)).unwrap(), 2);
        }

        let (_, entries) = WriteAheadLog::open(&path, true).unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn test_rewrite_replaces_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("compact.wal");

        let (wal, _) = WriteAheadLog::open(&path, false).unwrap();
        for id in 1..=5 {
            wal.append(commit(id)).unwrap();
        }
        wal.rewrite(WalEntryKind::Snapshot {
            last_id: 5,
            contacts: vec![contact(1)],
        })
        .unwrap();
        wal.append(commit(6)).unwrap();
        drop(wal);

        let (wal, entries) = WriteAheadLog::open(&path, false).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].kind, WalEntryKind::Snapshot { last_id: 5, .. }));
        assert_eq!(wal.current_sequence().unwrap(), 2);
    }
}
