//! File-based store for persistent caches.

use crate::error::{StorageError, StorageResult};
use crate::record::{is_torn_tail, LogRecord, LogRecordType};
use crate::store::LocalStore;
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// A file-backed key-value store.
///
/// Every `put` and `delete` is appended to a log file; opening the store
/// replays the log to rebuild the in-memory index. Data survives process
/// restarts.
///
/// # Durability
///
/// - Each write is flushed to the OS before the call returns
/// - [`FileStore::sync`] calls `File::sync_all()` to force data to disk
/// - A torn record at the tail of the log (crash mid-write) is discarded
///   on open
///
/// # Locking
///
/// A sibling `<file>.lock` is held with an exclusive advisory lock for as
/// long as the store is open, so only one process writes the log.
///
/// # Example
///
/// ```no_run
/// use localsync_storage::{FileStore, LocalStore};
/// use std::path::Path;
///
/// let store = FileStore::open(Path::new("cache.log")).unwrap();
/// store.put("book/1", b"{}").unwrap();
/// store.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: Mutex<Inner>,
    _lock_file: File,
}

#[derive(Debug)]
struct Inner {
    file: File,
    index: BTreeMap<String, Vec<u8>>,
    size: u64,
    /// Records in the log that no longer back a live key.
    dead_records: u64,
}

impl FileStore {
    /// Opens or creates a file store at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process holds the lock ([`StorageError::Locked`])
    /// - The log contains a corrupted record ([`StorageError::Corrupted`])
    /// - An I/O error occurs
    pub fn open(path: &Path) -> StorageResult<Self> {
        let lock_path = lock_path_for(path);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: path.display().to_string(),
            });
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let (index, valid_len, dead_records) = replay_log(&bytes)?;

        if valid_len < bytes.len() as u64 {
            tracing::warn!(
                path = %path.display(),
                valid_len,
                file_len = bytes.len(),
                "discarding torn record at end of store log"
            );
            file.set_len(valid_len)?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner {
                file,
                index,
                size: valid_len,
                dead_records,
            }),
            _lock_file: lock_file,
        })
    }

    /// Opens or creates a file store, creating parent directories if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the store cannot
    /// be opened.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Returns the path to the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the current size of the log in bytes.
    #[must_use]
    pub fn log_size(&self) -> u64 {
        self.inner.lock().size
    }

    /// Returns the number of log records that no longer back a live key.
    #[must_use]
    pub fn dead_records(&self) -> u64 {
        self.inner.lock().dead_records
    }

    /// Syncs the log to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    pub fn sync(&self) -> StorageResult<()> {
        self.inner.lock().file.sync_all()?;
        Ok(())
    }

    /// Rewrites the log so it holds exactly one record per live key.
    ///
    /// The compacted log is written to a temporary file, synced, and renamed
    /// over the original. Returns the number of bytes reclaimed.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be written or renamed.
    pub fn compact(&self) -> StorageResult<u64> {
        let mut inner = self.inner.lock();
        let temp_path = self.path.with_extension("compact");

        let mut temp = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;

        let mut new_size = 0u64;
        for (key, value) in &inner.index {
            let frame = LogRecord::put(key.as_str(), value.as_slice()).encode();
            temp.write_all(&frame)?;
            new_size += frame.len() as u64;
        }
        temp.sync_all()?;
        drop(temp);

        fs::rename(&temp_path, &self.path)?;

        inner.file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        let reclaimed = inner.size.saturating_sub(new_size);
        inner.size = new_size;
        inner.dead_records = 0;

        tracing::debug!(path = %self.path.display(), reclaimed, "compacted store log");
        Ok(reclaimed)
    }

    fn append(&self, record: LogRecord) -> StorageResult<()> {
        let frame = record.encode();
        let mut inner = self.inner.lock();

        let size = inner.size;
        append_frame(&mut inner.file, size, &frame)?;
        inner.size += frame.len() as u64;

        let replaced = match record.record_type {
            LogRecordType::Put => inner.index.insert(record.key, record.value).is_some(),
            LogRecordType::Delete => {
                // The delete record itself is dead weight once written.
                inner.dead_records += 1;
                inner.index.remove(&record.key).is_some()
            }
        };
        if replaced {
            inner.dead_records += 1;
        }
        Ok(())
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.inner.lock().index.get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.append(LogRecord::put(key, value))
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        if !self.inner.lock().index.contains_key(key) {
            return Ok(());
        }
        self.append(LogRecord::delete(key))
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.inner.lock().index.keys().cloned().collect())
    }

    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.inner.lock().index.contains_key(key))
    }
}

/// A log file that can be cut back after a failed append.
trait LogFile: Write {
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Appends `frame` at `size`. On failure, any partial frame is cut off so
/// the next append starts on a record boundary.
fn append_frame<F: LogFile>(file: &mut F, size: u64, frame: &[u8]) -> io::Result<()> {
    if let Err(err) = file.write_all(frame).and_then(|()| file.flush()) {
        if let Err(rollback) = file.truncate_to(size) {
            tracing::warn!(size, error = %rollback, "could not roll back partial append");
        }
        return Err(err);
    }
    Ok(())
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    path.with_file_name(name)
}

/// Replays a log image into an index.
///
/// Returns the index, the length of the valid prefix, and the number of dead
/// records encountered.
fn replay_log(bytes: &[u8]) -> StorageResult<(BTreeMap<String, Vec<u8>>, u64, u64)> {
    let mut index = BTreeMap::new();
    let mut offset = 0usize;
    let mut dead_records = 0u64;

    while offset < bytes.len() {
        match LogRecord::decode(&bytes[offset..], offset as u64)? {
            Some((record, len)) => {
                match record.record_type {
                    LogRecordType::Put => {
                        if index.insert(record.key, record.value).is_some() {
                            dead_records += 1;
                        }
                    }
                    LogRecordType::Delete => {
                        dead_records += 1;
                        if index.remove(&record.key).is_some() {
                            dead_records += 1;
                        }
                    }
                }
                offset += len;
            }
            None if is_torn_tail(&bytes[offset..]) => break,
            None => {
                return Err(StorageError::corrupted(
                    offset as u64,
                    "record length runs past the following records",
                ))
            }
        }
    }

    Ok((index, offset as u64, dead_records))
}
